//! Speedscope profile import
//!
//! Sampling profilers such as py-spy export the speedscope file format: a
//! shared frame table plus one sampled profile per thread, where each sample
//! lists frame indices from the outermost call inwards.

use super::{Frame, ProfileSession, StackSample};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct SpeedscopeFile {
    shared: SharedFrames,
    profiles: Vec<Profile>,
}

#[derive(Debug, Deserialize)]
struct SharedFrames {
    frames: Vec<SpeedscopeFrame>,
}

#[derive(Debug, Deserialize)]
struct SpeedscopeFrame {
    name: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Profile {
    #[serde(rename_all = "camelCase")]
    Sampled {
        name: String,
        unit: String,
        start_value: f64,
        end_value: f64,
        samples: Vec<Vec<usize>>,
        weights: Vec<f64>,
    },
    // Evented profiles carry open/close events rather than samples
    #[serde(other)]
    Unsupported,
}

/// Seconds per unit of a speedscope value; `None` for unitless weights
fn unit_scale(unit: &str) -> Result<Option<f64>> {
    Ok(match unit {
        "seconds" => Some(1.0),
        "milliseconds" => Some(1e-3),
        "microseconds" => Some(1e-6),
        "nanoseconds" => Some(1e-9),
        "none" => None,
        other => bail!("Unsupported speedscope unit: {}", other),
    })
}

/// Parse a speedscope document into a session.
///
/// Unitless weights are taken as sample counts and scaled by `interval`.
pub fn parse(
    json: &str,
    program: &str,
    interval: Duration,
    started_at: f64,
) -> Result<ProfileSession> {
    let file: SpeedscopeFile =
        serde_json::from_str(json).context("Failed to parse speedscope profile")?;

    let frames: Vec<Frame> = file
        .shared
        .frames
        .into_iter()
        .map(|f| Frame {
            name: f.name,
            file: f.file,
            line: f.line,
        })
        .collect();

    let mut threads = Vec::new();
    let mut samples = Vec::new();
    let mut duration_secs: f64 = 0.0;

    for profile in file.profiles {
        let Profile::Sampled {
            name,
            unit,
            start_value,
            end_value,
            samples: stacks,
            weights,
        } = profile
        else {
            continue;
        };

        if stacks.len() != weights.len() {
            bail!(
                "Profile '{}' has {} samples but {} weights",
                name,
                stacks.len(),
                weights.len()
            );
        }

        let scale = unit_scale(&unit)?;
        let to_secs = |value: f64| match scale {
            Some(s) => value * s,
            None => value * interval.as_secs_f64(),
        };
        duration_secs = duration_secs.max(to_secs(end_value - start_value));

        let thread = threads.len();
        threads.push(name);

        let mut offset = 0.0;
        for (stack, weight) in stacks.into_iter().zip(weights) {
            if let Some(&bad) = stack.iter().find(|&&i| i >= frames.len()) {
                bail!("Sample references unknown frame {}", bad);
            }
            let weight_secs = to_secs(weight);
            samples.push(StackSample {
                thread,
                offset_secs: offset,
                weight_secs,
                stack,
            });
            offset += weight_secs;
        }
    }

    Ok(ProfileSession {
        program: program.to_string(),
        started_at,
        duration_secs,
        interval,
        threads,
        frames,
        samples,
    })
}
