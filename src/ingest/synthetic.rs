//! Synthetic (`stub://`) frame source.
//!
//! Produces a finite clip of bright squares drifting across a dark background.
//! Objects wrap around with a gap, so the number visible at once rises and
//! falls over the clip. Output is deterministic for a given URL.
//!
//! URL form: `stub://<name>?frames=N&objects=K&width=W&height=H&fps=F&stamp=1`.
//!
//! With `stamp=1` every frame carries its index in a solid band along the
//! right edge (red = low byte, green = high byte), readable with
//! [`read_stamp`] even after the frame has been resized.

use anyhow::{anyhow, bail, Context, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEFAULT_FRAMES: u64 = 300;
const DEFAULT_OBJECTS: usize = 3;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: f64 = 15.0;

pub const BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);
pub const OBJECT: Rgb<u8> = Rgb([240, 240, 240]);

/// Parameters of a synthetic clip.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub name: String,
    pub frames: u64,
    pub objects: usize,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub stamp: bool,
}

impl SyntheticConfig {
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source URL must start with stub://"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut config = Self {
            name: name.to_string(),
            frames: DEFAULT_FRAMES,
            objects: DEFAULT_OBJECTS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            stamp: false,
        };
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed query parameter {:?} in {}", pair, url))?;
            let invalid = || format!("invalid value for {} in {}", key, url);
            match key {
                "frames" => config.frames = value.parse().with_context(invalid)?,
                "objects" => config.objects = value.parse().with_context(invalid)?,
                "width" => config.width = value.parse().with_context(invalid)?,
                "height" => config.height = value.parse().with_context(invalid)?,
                "fps" => config.fps = value.parse().with_context(invalid)?,
                "stamp" => {
                    config.stamp = match value {
                        "1" | "true" => true,
                        "0" | "false" => false,
                        _ => bail!("{}", invalid()),
                    }
                }
                other => bail!("unknown stub parameter {:?} in {}", other, url),
            }
        }
        if config.width < 16 || config.height < 16 {
            bail!("synthetic frames must be at least 16x16");
        }
        if config.fps < 0.0 {
            bail!("synthetic fps must not be negative");
        }
        Ok(config)
    }
}

#[derive(Clone, Debug)]
struct Sprite {
    size: u32,
    y: u32,
    speed: u32,
    phase: u32,
}

/// Deterministic synthetic clip.
pub struct SyntheticSource {
    config: SyntheticConfig,
    sprites: Vec<Sprite>,
    position: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(seed_for(&config.name));
        let size = (config.width.min(config.height) / 8).max(4);
        let sprites = (0..config.objects)
            .map(|_| Sprite {
                size,
                y: rng.gen_range(0..config.height - size),
                speed: rng.gen_range(2..=8),
                phase: rng.gen_range(0..config.width * 2),
            })
            .collect();
        log::info!(
            "SyntheticSource: {} ({}x{}, {} frames, {} objects)",
            config.name,
            config.width,
            config.height,
            config.frames,
            config.objects
        );
        Self {
            config,
            sprites,
            position: 0,
        }
    }

    pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.position >= self.config.frames {
            return Ok(None);
        }
        let frame = self.render(self.position);
        self.position += 1;
        Ok(Some(frame))
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub fn fps(&self) -> f64 {
        self.config.fps
    }

    pub fn frame_count(&self) -> Option<u64> {
        Some(self.config.frames)
    }

    /// Number of sprites fully or partly inside frame `index`.
    pub fn visible_objects(&self, index: u64) -> usize {
        self.sprites
            .iter()
            .filter(|sprite| self.sprite_x(sprite, index).is_some())
            .count()
    }

    fn render(&self, index: u64) -> RgbImage {
        let mut frame = RgbImage::from_pixel(self.config.width, self.config.height, BACKGROUND);
        for sprite in &self.sprites {
            let Some(x) = self.sprite_x(sprite, index) else {
                continue;
            };
            for dy in 0..sprite.size {
                for dx in 0..sprite.size {
                    let (px, py) = (x + dx, sprite.y + dy);
                    if px < self.config.width && py < self.config.height {
                        frame.put_pixel(px, py, OBJECT);
                    }
                }
            }
        }
        if self.config.stamp {
            let (w, h) = (self.config.width, self.config.height);
            let color = Rgb([(index & 0xff) as u8, ((index >> 8) & 0xff) as u8, 0]);
            for y in h / 4..h * 3 / 4 {
                for x in w * 3 / 4..w {
                    frame.put_pixel(x, y, color);
                }
            }
        }
        frame
    }

    /// Left edge of a sprite, or `None` while it travels through the off-screen gap.
    fn sprite_x(&self, sprite: &Sprite, index: u64) -> Option<u32> {
        let track = u64::from(self.config.width) * 2;
        let travelled = (index * u64::from(sprite.speed) + u64::from(sprite.phase)) % track;
        let limit = u64::from(self.config.width.saturating_sub(sprite.size));
        (travelled <= limit).then_some(travelled as u32)
    }
}

/// Frame index painted by a `stamp=1` clip, sampled from the middle of the
/// stamp band. Only meaningful for frames without sprites over the band.
pub fn read_stamp(frame: &RgbImage) -> u64 {
    let (w, h) = frame.dimensions();
    let [lo, hi, _] = frame.get_pixel(w - w / 16 - 1, h / 2).0;
    u64::from(lo) | (u64::from(hi) << 8)
}

fn seed_for(name: &str) -> u64 {
    // FNV-1a
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}
