//! A stand-in slicer that fakes layer-by-layer work.

use plater_editor::{CancelToken, PlateInput, SliceFailure, Slicer, ValidationIssue, ValidationReport};
use std::thread;
use std::time::Duration;

const DEFAULT_BED_SIZE: f64 = 250.0;
const DEFAULT_LAYER_HEIGHT: f64 = 0.2;

/// Height of an object at scale 1, in mm
const OBJECT_HEIGHT: f64 = 20.0;

/// Slices nothing, but takes `layer_time` per layer and honours cancellation.
/// Objects with the option `simulate_failure = true` fail to slice.
#[derive(Debug, Clone)]
pub struct SimulatedSlicer {
    layer_time: Duration,
}

impl SimulatedSlicer {
    pub fn new(layer_time: Duration) -> Self {
        Self { layer_time }
    }

    fn option(input: &PlateInput, key: &str, default: f64) -> f64 {
        input
            .config
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn layer_count(input: &PlateInput) -> u32 {
        let layer_height = Self::option(input, "layer_height", DEFAULT_LAYER_HEIGHT);
        if layer_height <= 0.0 {
            return 0;
        }
        let tallest = input
            .objects
            .iter()
            .flat_map(|o| o.instances.iter())
            .map(|i| i.scale * OBJECT_HEIGHT)
            .fold(0.0, f64::max);
        (tallest / layer_height).ceil() as u32
    }
}

impl Slicer for SimulatedSlicer {
    fn validate(&self, input: &PlateInput) -> ValidationReport {
        let mut report = ValidationReport::default();

        let layer_height = Self::option(input, "layer_height", DEFAULT_LAYER_HEIGHT);
        if layer_height <= 0.0 {
            report.errors.push(
                ValidationIssue::new(format!("Layer height must be positive, got {}", layer_height))
                    .on_option("layer_height"),
            );
        }

        let half_bed = Self::option(input, "bed_size", DEFAULT_BED_SIZE) / 2.0;
        for object in &input.objects {
            let outside = object
                .instances
                .iter()
                .any(|i| i.offset[0].abs() > half_bed || i.offset[1].abs() > half_bed);
            if outside {
                report.errors.push(
                    ValidationIssue::new(format!("\"{}\" is outside the print bed", object.name))
                        .on_object(object.id),
                );
            }
            if object.instances.iter().any(|i| i.scale > 5.0) {
                report.warnings.push(
                    ValidationIssue::new(format!("\"{}\" is scaled up a lot", object.name))
                        .on_object(object.id),
                );
            }
        }
        report
    }

    fn slice(&self, input: &PlateInput, cancel: &CancelToken) -> Result<(), SliceFailure> {
        let layers = Self::layer_count(input);
        for _ in 0..layers {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if !self.layer_time.is_zero() {
                thread::sleep(self.layer_time);
            }
        }

        let failing: Vec<_> = input
            .objects
            .iter()
            .filter(|o| o.options.get("simulate_failure").map(String::as_str) == Some("true"))
            .map(|o| o.id)
            .collect();
        if !failing.is_empty() {
            return Err(SliceFailure {
                message: format!("{} object(s) produced no printable layers", failing.len()),
                critical: false,
                objects: failing,
            });
        }

        tracing::debug!("{} sliced into {} layers", input.plate, layers);
        Ok(())
    }
}
