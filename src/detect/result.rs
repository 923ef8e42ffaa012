/// One decoded row of an SSD-style detection tensor:
/// `(batch, class_id, confidence, xmin, ymin, xmax, ymax)`, box in normalized [0, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub batch: f32,
    pub class_id: u32,
    pub confidence: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// Detections for one submitted frame, in engine output order.
pub type Detections = Vec<RawDetection>;

/// Pixel-space box, already scaled to a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl RawDetection {
    pub const WIDTH: usize = 7;

    /// Decode a flat `[.., 7]` tensor. A negative batch id marks the end of
    /// valid rows.
    pub fn decode(flat: &[f32]) -> Detections {
        flat.chunks_exact(Self::WIDTH)
            .take_while(|row| row[0] >= 0.0)
            .map(|row| Self {
                batch: row[0],
                class_id: row[1].max(0.0) as u32,
                confidence: row[2],
                xmin: row[3],
                ymin: row[4],
                xmax: row[5],
                ymax: row[6],
            })
            .collect()
    }

    pub fn to_row(&self) -> [f32; 7] {
        [
            self.batch,
            self.class_id as f32,
            self.confidence,
            self.xmin,
            self.ymin,
            self.xmax,
            self.ymax,
        ]
    }

    /// Scale the normalized box to a `width` x `height` frame.
    pub fn scaled(&self, width: u32, height: u32) -> PixelBox {
        let (w, h) = (width as f32, height as f32);
        PixelBox {
            xmin: (self.xmin * w) as i32,
            ymin: (self.ymin * h) as i32,
            xmax: (self.xmax * w) as i32,
            ymax: (self.ymax * h) as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_stops_at_negative_batch() {
        let flat = [
            0.0, 1.0, 0.9, 0.1, 0.1, 0.5, 0.5, //
            0.0, 3.0, 0.2, 0.0, 0.0, 1.0, 1.0, //
            -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 2.0, 0.8, 0.0, 0.0, 1.0, 1.0,
        ];
        let detections = RawDetection::decode(&flat);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 1);
        assert_eq!(detections[1].class_id, 3);
        assert_eq!(detections[1].to_row(), [0.0, 3.0, 0.2, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn scales_to_pixels() {
        let detection = RawDetection {
            batch: 0.0,
            class_id: 1,
            confidence: 0.5,
            xmin: 0.25,
            ymin: 0.5,
            xmax: 0.75,
            ymax: 1.0,
        };
        assert_eq!(
            detection.scaled(640, 480),
            PixelBox {
                xmin: 160,
                ymin: 240,
                xmax: 480,
                ymax: 480
            }
        );
    }
}
