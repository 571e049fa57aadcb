use image::imageops::{self, FilterType};
use serde::Serialize;

use crate::model::{InferenceError, InputTensor, Model, INPUT_SIZE};
use crate::preprocess::PixelBuffer;
use crate::record::Label;
use crate::timer::Timer;

/// Scores strictly above this are labeled [`Label::Cancer`].
pub const DECISION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub result: Label,
    pub score: f32,
}

pub fn label_for_score(score: f32) -> Label {
    if score > DECISION_THRESHOLD {
        Label::Cancer
    } else {
        Label::NonCancer
    }
}

/// RGB only, exactly 224x224 (bilinear), scaled to `[0, 1]`, batch of one.
pub fn to_input_tensor(pixels: &PixelBuffer) -> Result<InputTensor, InferenceError> {
    let rgb = pixels.image().to_rgb8();
    let rgb = if pixels.dimensions() == (INPUT_SIZE, INPUT_SIZE) {
        rgb
    } else {
        imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
    };

    let values: Vec<f32> = rgb
        .into_raw()
        .iter()
        .map(|x| *x as f32 / 255f32)
        .collect();

    InputTensor::new(values)
}

/// Run `model` once over `pixels`.
pub fn classify(model: &dyn Model, pixels: &PixelBuffer) -> Result<Classification, InferenceError> {
    let input = to_input_tensor(pixels)?;

    let mut t = Timer::new_start("Running session");
    let score = model.predict(&input)?;
    t.stop();

    if !score.is_finite() {
        return Err(InferenceError::NonFinite(score));
    }

    Ok(Classification {
        result: label_for_score(score),
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
    use std::sync::Mutex;

    struct FixedScore(f32);

    impl Model for FixedScore {
        fn predict(&self, _input: &InputTensor) -> Result<f32, InferenceError> {
            Ok(self.0)
        }
    }

    /// Remembers the last tensor it saw.
    #[derive(Default)]
    struct Recording(Mutex<Option<InputTensor>>);

    impl Model for Recording {
        fn predict(&self, input: &InputTensor) -> Result<f32, InferenceError> {
            *self.0.lock().unwrap() = Some(input.clone());
            Ok(0.0)
        }
    }

    fn solid(width: u32, height: u32) -> PixelBuffer {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 0, 51]))).into()
    }

    #[test]
    fn threshold_is_strict() {
        assert_eq!(label_for_score(0.7), Label::Cancer);
        assert_eq!(label_for_score(0.5), Label::NonCancer);
        assert_eq!(label_for_score(0.500_001), Label::Cancer);
        assert_eq!(label_for_score(0.0), Label::NonCancer);
    }

    #[test]
    fn classify_maps_model_score() {
        let pixels = solid(224, 224);

        let hit = classify(&FixedScore(0.7), &pixels).unwrap();
        assert_eq!(hit.result, Label::Cancer);

        let miss = classify(&FixedScore(0.5), &pixels).unwrap();
        assert_eq!(miss.result, Label::NonCancer);
    }

    #[test]
    fn nan_scores_are_errors() {
        let err = classify(&FixedScore(f32::NAN), &solid(224, 224)).unwrap_err();
        assert!(matches!(err, InferenceError::NonFinite(_)));
    }

    #[test]
    fn tensor_is_scaled_rgb() {
        let model = Recording::default();
        classify(&model, &solid(224, 224)).unwrap();

        let seen = model.0.lock().unwrap().take().unwrap();
        assert_eq!(seen.values().len(), 224 * 224 * 3);
        assert_eq!(&seen.values()[..3], &[1.0, 0.0, 0.2]);
    }

    #[test]
    fn alpha_is_dropped_and_size_enforced() {
        let rgba = RgbaImage::from_pixel(50, 80, Rgba([0, 255, 0, 10]));
        let tensor = to_input_tensor(&DynamicImage::ImageRgba8(rgba).into()).unwrap();

        assert_eq!(tensor.values().len(), InputTensor::LEN);
        assert_eq!(&tensor.values()[..3], &[0.0, 1.0, 0.0]);
    }
}
