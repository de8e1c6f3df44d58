//! SSD detection output decoding and class labels
//!
//! SSD style networks emit a `[max_proposals, 7]` tensor whose rows are
//! `[image_id, label, confidence, xmin, ymin, xmax, ymax]` with coordinates
//! normalized to the frame. A negative `image_id` terminates the list.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs;
use std::path::Path;

use crate::error::{Result, SchedulerError};

/// Values per SSD proposal row
pub const SSD_OBJECT_SIZE: usize = 7;

/// Label prepended when the model has an implicit background class
pub const BACKGROUND_LABEL: &str = "fake";

/// Box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl PixelBox {
    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }
}

/// One decoded proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Row index in the raw output
    pub index: usize,
    pub label: usize,
    pub confidence: f32,
    pub bbox: PixelBox,
}

/// Decodes raw SSD output for frames of a fixed size
#[derive(Debug, Clone, Copy)]
pub struct SsdDecoder {
    threshold: f32,
    frame_size: (u32, u32),
}

impl SsdDecoder {
    pub fn new(threshold: f32, frame_size: (u32, u32)) -> Self {
        Self {
            threshold,
            frame_size,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Every proposal up to the terminator, scaled to pixels
    pub fn proposals(&self, output: &Array2<f32>) -> Result<Vec<Detection>> {
        if output.ncols() != SSD_OBJECT_SIZE {
            return Err(SchedulerError::consumer(format!(
                "SSD output must have {} values per proposal, got {}",
                SSD_OBJECT_SIZE,
                output.ncols()
            )));
        }

        let (width, height) = (self.frame_size.0 as f32, self.frame_size.1 as f32);
        let detections = output
            .rows()
            .into_iter()
            .enumerate()
            .take_while(|(_, row)| row[0] >= 0.0)
            .map(|(index, row)| Detection {
                index,
                label: row[1].max(0.0) as usize,
                confidence: row[2],
                bbox: PixelBox {
                    xmin: row[3] * width,
                    ymin: row[4] * height,
                    xmax: row[5] * width,
                    ymax: row[6] * height,
                },
            })
            .collect();
        Ok(detections)
    }

    /// Proposals confident enough to be rendered
    pub fn decode(&self, output: &Array2<f32>) -> Result<Vec<Detection>> {
        Ok(self
            .proposals(output)?
            .into_iter()
            .filter(|detection| self.is_rendered(detection))
            .collect())
    }

    pub fn is_rendered(&self, detection: &Detection) -> bool {
        detection.confidence > self.threshold
    }
}

/// Class names indexed by label id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    /// Whitespace separated names, in label order
    pub fn parse(text: &str) -> Self {
        Self {
            names: text.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let labels = Self::parse(&text);
        log::info!(
            "Loaded {} label(s) from {}",
            labels.len(),
            path.as_ref().display()
        );
        Ok(labels)
    }

    /// Match the labels to a model with `num_classes` outputs
    ///
    /// One missing name means the model has a background class, so a
    /// placeholder is inserted at index 0. Any other mismatch drops the names.
    pub fn aligned_to(mut self, num_classes: usize) -> Self {
        if self.names.is_empty() || self.names.len() == num_classes {
            return self;
        }
        if self.names.len() + 1 == num_classes {
            self.names.insert(0, BACKGROUND_LABEL.to_string());
            return self;
        }
        log::warn!(
            "{} label(s) do not match {} classes, falling back to label ids",
            self.names.len(),
            num_classes
        );
        self.names.clear();
        self
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, label: usize) -> Cow<'_, str> {
        match self.names.get(label) {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(format!("label #{}", label)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_decode_scales_and_filters() {
        let output = array![
            [0.0, 1.0, 0.9, 0.1, 0.2, 0.5, 0.6],
            [0.0, 2.0, 0.3, 0.0, 0.0, 1.0, 1.0],
            [0.0, 3.0, 0.5, 0.0, 0.0, 0.5, 0.5],
        ];
        let decoder = SsdDecoder::new(0.5, (200, 100));

        assert_eq!(decoder.proposals(&output).unwrap().len(), 3);

        // Strictly above the threshold
        let detections = decoder.decode(&output).unwrap();
        assert_eq!(detections.len(), 1);
        let detection = &detections[0];
        assert_eq!(detection.index, 0);
        assert_eq!(detection.label, 1);
        assert!((detection.bbox.xmin - 20.0).abs() < 1e-4);
        assert!((detection.bbox.ymin - 20.0).abs() < 1e-4);
        assert!((detection.bbox.width() - 80.0).abs() < 1e-4);
        assert!((detection.bbox.height() - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_negative_image_id_terminates() {
        let output = array![
            [0.0, 1.0, 0.9, 0.1, 0.1, 0.2, 0.2],
            [-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.9, 0.1, 0.1, 0.2, 0.2],
        ];
        let decoder = SsdDecoder::new(0.1, (10, 10));
        assert_eq!(decoder.proposals(&output).unwrap().len(), 1);
    }

    #[test]
    fn test_wrong_row_width_rejected() {
        let output = Array2::<f32>::zeros((4, 6));
        let decoder = SsdDecoder::new(0.5, (10, 10));
        assert!(matches!(
            decoder.proposals(&output),
            Err(SchedulerError::Consumer(_))
        ));
    }

    #[test]
    fn test_labels_gain_background_placeholder() {
        let labels = Labels::parse("person car\nbicycle").aligned_to(4);
        assert_eq!(labels.len(), 4);
        assert_eq!(labels.name(0), BACKGROUND_LABEL);
        assert_eq!(labels.name(1), "person");
        assert_eq!(labels.name(3), "bicycle");
    }

    #[test]
    fn test_mismatched_labels_fall_back_to_ids() {
        let labels = Labels::parse("person car").aligned_to(10);
        assert!(labels.is_empty());
        assert_eq!(labels.name(7), "label #7");

        let exact = Labels::parse("a b c").aligned_to(3);
        assert_eq!(exact.name(2), "c");
        assert_eq!(exact.name(3), "label #3");
    }
}
