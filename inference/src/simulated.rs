//! Simulated collaborators: a synthetic camera and an SSD-shaped model
//!
//! Used by the demo, the benches and the tests in place of a real capture
//! device and inference engine.

use crossbeam::channel::bounded;
use image::{Rgb, RgbImage};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::InferenceModel;
use crate::detection::SSD_OBJECT_SIZE;
use crate::error::{Result, SchedulerError};
use crate::source::{ChannelSource, FrameSource, Next};

/// A captured video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Pause of the capture thread when its source has nothing ready
const CAPTURE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Produces gradient frames whose pattern drifts with the clip position
///
/// A limited source behaves like a clip of `limit` frames. With looping
/// enabled the clip is replayed from its first frame instead of ending,
/// while frame ids keep counting up.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    limit: Option<u64>,
    looping: bool,
    next_id: u64,
    position: u64,
}

impl SyntheticSource {
    /// `limit` of None streams forever
    pub fn new(width: u32, height: u32, limit: Option<u64>) -> Self {
        Self {
            width,
            height,
            limit,
            looping: false,
            next_id: 0,
            position: 0,
        }
    }

    /// Replay the clip from the start when it runs out
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    fn render(&self, frame_id: u64) -> RgbImage {
        let shift = (frame_id % 256) as u32;
        let mut image = RgbImage::new(self.width, self.height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let r = ((x + shift) % 255) as u8;
            let g = ((y + shift) % 255) as u8;
            let b = (x.wrapping_mul(y) % 255) as u8;
            *pixel = Rgb([r, g, b]);
        }
        image
    }
}

impl FrameSource<Frame> for SyntheticSource {
    fn try_next(&mut self) -> Result<Next<Frame>> {
        if let Some(limit) = self.limit {
            if self.position >= limit {
                if !self.looping || limit == 0 {
                    return Ok(Next::End);
                }
                log::debug!("End of clip after frame {}, replaying", self.next_id);
                self.position = 0;
            }
        }
        let frame = Frame {
            frame_id: self.next_id,
            image: self.render(self.position),
        };
        self.next_id += 1;
        self.position += 1;
        Ok(Next::Unit(frame))
    }
}

/// Run `source` on its own thread at `fps`, handing frames over a small channel
///
/// The capture thread stops when the source ends or the returned
/// `ChannelSource` is dropped, and reports how many frames it produced.
pub fn spawn_capture<T, S>(
    mut source: S,
    fps: f64,
) -> Result<(ChannelSource<T>, thread::JoinHandle<Result<u64>>)>
where
    T: Send + 'static,
    S: FrameSource<T> + Send + 'static,
{
    if !(fps > 0.0 && fps.is_finite()) {
        return Err(SchedulerError::config(format!(
            "capture rate must be positive, got {}",
            fps
        )));
    }
    let period = Duration::try_from_secs_f64(1.0 / fps).map_err(|e| {
        SchedulerError::config(format!("capture rate {} is out of range: {}", fps, e))
    })?;
    let (tx, rx) = bounded(2);

    let handle = thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || -> Result<u64> {
            let mut produced = 0;
            let mut next_deadline = Instant::now();
            loop {
                let frame = match source.try_next()? {
                    Next::Unit(frame) => frame,
                    Next::Pending => {
                        thread::sleep(CAPTURE_RETRY_INTERVAL);
                        continue;
                    }
                    Next::End => break,
                };
                if tx.send(frame).is_err() {
                    log::debug!("Capture stopped: consumer went away");
                    break;
                }
                produced += 1;

                next_deadline = next_deadline.checked_add(period).ok_or_else(|| {
                    SchedulerError::config(format!("capture period {:?} overflows the clock", period))
                })?;
                let now = Instant::now();
                if next_deadline > now {
                    thread::sleep(next_deadline - now);
                } else {
                    next_deadline = now;
                }
            }
            log::debug!("Capture produced {} frame(s)", produced);
            Ok(produced)
        })?;

    Ok((ChannelSource::new(rx), handle))
}

/// Tuning for `SimulatedSsd`
#[derive(Debug, Clone)]
pub struct SimulatedSsdConfig {
    /// Mean inference time
    pub latency: Duration,
    /// Uniform spread around the mean
    pub jitter: Duration,
    /// Rows of the output tensor
    pub max_proposals: usize,
    /// Including the background class at index 0
    pub num_classes: usize,
    /// Frame on which inference fails
    pub fail_at_frame: Option<u64>,
    pub seed: u64,
}

impl Default for SimulatedSsdConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(30),
            jitter: Duration::from_millis(10),
            max_proposals: 100,
            num_classes: 21,
            fail_at_frame: None,
            seed: 0x5eed,
        }
    }
}

/// Model that sleeps like a real network and emits random SSD proposals
///
/// Proposals are derived from the frame id, so a frame always decodes to the
/// same detections whichever pool processed it.
pub struct SimulatedSsd {
    config: SimulatedSsdConfig,
}

impl SimulatedSsd {
    pub fn new(config: SimulatedSsdConfig) -> Result<Self> {
        if config.max_proposals == 0 || config.num_classes < 2 {
            return Err(SchedulerError::config(
                "simulated model needs proposals and at least one non-background class",
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulatedSsdConfig {
        &self.config
    }

    fn delay(&self) -> Duration {
        let jitter = self.config.jitter.as_secs_f64();
        if jitter <= 0.0 {
            return self.config.latency;
        }
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_secs_f64((self.config.latency.as_secs_f64() + offset).max(0.0))
    }

    fn proposals(&self, frame_id: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ frame_id);
        let rows = self.config.max_proposals;
        let count = rng.gen_range(0..rows);

        let mut output = Array2::<f32>::zeros((rows, SSD_OBJECT_SIZE));
        for mut row in output.rows_mut().into_iter().take(count) {
            let xmin: f32 = rng.gen_range(0.0..0.8);
            let ymin: f32 = rng.gen_range(0.0..0.8);
            row[0] = 0.0;
            row[1] = rng.gen_range(1..self.config.num_classes) as f32;
            row[2] = rng.gen_range(0.0..1.0);
            row[3] = xmin;
            row[4] = ymin;
            row[5] = xmin + rng.gen_range(0.05..0.2);
            row[6] = ymin + rng.gen_range(0.05..0.2);
        }
        if count < rows {
            output[[count, 0]] = -1.0;
        }
        output
    }
}

impl InferenceModel for SimulatedSsd {
    type Input = Frame;
    type Output = Array2<f32>;

    fn infer(&self, frame: &Frame) -> std::result::Result<Array2<f32>, String> {
        thread::sleep(self.delay());
        if self.config.fail_at_frame == Some(frame.frame_id) {
            return Err(format!("inference failed on frame {}", frame.frame_id));
        }
        Ok(self.proposals(frame.frame_id))
    }

    fn name(&self) -> &str {
        "simulated-ssd"
    }
}
