//! Flex Envelope Module
//!
//! This module provides the free-form multi-point envelopes a region may
//! route to pitch or gain. A flex envelope walks its breakpoint list one
//! linear segment at a time, optionally holding at a sustain point until
//! the voice is released, then continues through the remaining points and
//! holds the final level.

use crate::region::FlexEgDescriptor;

/// Multi-point envelope generator.
#[derive(Debug, Clone)]
pub struct FlexEg {
    desc: FlexEgDescriptor,

    /// Index of the point currently being approached
    target_point: usize,

    level: f32,
    step: f32,

    /// Frames left in the current segment
    remaining: u32,

    sustaining: bool,
    released: bool,
    sample_rate: f32,
    active: bool,
}

impl FlexEg {
    /// Creates an inactive envelope.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            desc: FlexEgDescriptor::default(),
            target_point: 0,
            level: 0.0,
            step: 0.0,
            remaining: 0,
            sustaining: false,
            released: false,
            sample_rate,
            active: false,
        }
    }

    /// Configures the envelope from a region descriptor and starts it
    /// from level zero.
    pub fn configure(&mut self, desc: &FlexEgDescriptor) {
        self.desc = desc.clone();
        self.level = 0.0;
        self.target_point = 0;
        self.sustaining = false;
        self.released = false;
        self.active = !self.desc.points.is_empty();
        self.begin_segment();
    }

    /// Updates the sample rate used when segments begin.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Lets a sustaining envelope continue past its sustain point.
    pub fn release(&mut self) {
        self.released = true;
        if self.sustaining {
            self.sustaining = false;
            self.target_point += 1;
            self.begin_segment();
        }
    }

    /// Stops the envelope.
    pub fn reset(&mut self) {
        self.active = false;
        self.level = 0.0;
        self.target_point = 0;
        self.remaining = 0;
        self.sustaining = false;
        self.released = false;
    }

    /// Whether the envelope has been configured since the last reset.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Descriptor the envelope was configured with.
    pub fn descriptor(&self) -> &FlexEgDescriptor {
        &self.desc
    }

    /// Fills a span with the next block of envelope values.
    pub fn fill_block(&mut self, out: &mut [f32]) {
        if !self.active {
            out.fill(0.0);
            return;
        }

        for sample in out.iter_mut() {
            *sample = self.tick();
        }
    }

    fn tick(&mut self) -> f32 {
        if self.sustaining || self.target_point >= self.desc.points.len() {
            return self.level;
        }

        if self.remaining > 0 {
            self.remaining -= 1;
            self.level += self.step;
        }

        if self.remaining == 0 {
            self.level = self.desc.points[self.target_point].level;
            if self.target_point == self.desc.sustain_point && !self.released {
                self.sustaining = true;
            } else {
                self.target_point += 1;
                self.begin_segment();
            }
        }

        self.level
    }

    fn begin_segment(&mut self) {
        if self.target_point >= self.desc.points.len() {
            self.remaining = 0;
            self.step = 0.0;
            return;
        }

        let point = self.desc.points[self.target_point];
        let frames = (point.time.max(0.0) * self.sample_rate).round() as u32;
        self.remaining = frames;
        self.step = if frames > 0 {
            (point.level - self.level) / frames as f32
        } else {
            0.0
        };
        if frames == 0 {
            self.level = point.level;
            if self.target_point == self.desc.sustain_point && !self.released {
                self.sustaining = true;
            } else {
                self.target_point += 1;
                self.begin_segment();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::FlexPoint;

    const SAMPLE_RATE: f32 = 1000.0;

    fn two_point_descriptor() -> FlexEgDescriptor {
        FlexEgDescriptor {
            points: vec![
                FlexPoint {
                    time: 0.01, // 10 frames up
                    level: 1.0,
                },
                FlexPoint {
                    time: 0.01, // 10 frames down
                    level: 0.0,
                },
            ],
            sustain_point: 0,
            pitch_depth: 0.0,
            gain_depth: 0.0,
        }
    }

    #[test]
    fn test_inactive_outputs_zero() {
        let mut eg = FlexEg::new(SAMPLE_RATE);
        let mut block = [1.0f32; 8];
        eg.fill_block(&mut block);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_ramps_to_first_point() {
        let mut eg = FlexEg::new(SAMPLE_RATE);
        eg.configure(&two_point_descriptor());

        let mut block = [0.0f32; 10];
        eg.fill_block(&mut block);
        assert!(block[0] > 0.0);
        assert!((block[9] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_sustain_point_holds_until_release() {
        let mut eg = FlexEg::new(SAMPLE_RATE);
        eg.configure(&two_point_descriptor());

        let mut block = [0.0f32; 50];
        eg.fill_block(&mut block);
        assert!((block[49] - 1.0).abs() < 1e-5, "should hold at sustain point");

        eg.release();
        let mut tail = [0.0f32; 20];
        eg.fill_block(&mut tail);
        assert!((tail[19] - 0.0).abs() < 1e-5, "should fall after release");
    }

    #[test]
    fn test_holds_final_level() {
        let mut eg = FlexEg::new(SAMPLE_RATE);
        let desc = FlexEgDescriptor {
            sustain_point: usize::MAX,
            ..two_point_descriptor()
        };
        eg.configure(&desc);

        let mut block = [0.0f32; 100];
        eg.fill_block(&mut block);
        assert!((block[99] - 0.0).abs() < 1e-5);
    }
}
