use std::collections::HashMap;
use std::path::Path;

use crate::config_set::{ConfigSet, SynthesisError, Synthesizer};
use crate::exclude::is_excluded;
use crate::image::ImageDescriptor;
use crate::matrix::{self, Combination};
use crate::template::value_text;

/// The surviving config sets of one image, ready to be queued.
#[derive(Debug, Clone, Default)]
pub struct ImagePlan {
    pub image: String,
    pub entries: Vec<(ConfigSet, ImageDescriptor)>,
    /// Combinations dropped by `excludes`
    pub excluded: usize,
}

impl ImagePlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Expand, synthesize and filter every combination of `image`.
///
/// The first synthesis error aborts the image. Two surviving combinations
/// whose descriptor names collide (names are lowercased and sanitized, so
/// `Alpine` and `alpine` both become `alpine`) are rejected, since they would
/// share one rendered Dockerfile.
pub fn plan_image(
    synthesizer: &Synthesizer<'_>,
    image: &str,
    workdir: &Path,
) -> Result<ImagePlan, SynthesisError> {
    let definition = synthesizer
        .config()
        .image(image)
        .ok_or_else(|| SynthesisError::UnknownImage {
            image: image.to_owned(),
        })?;

    let mut plan = ImagePlan {
        image: image.to_owned(),
        ..Default::default()
    };

    // name -> index into plan.entries
    let mut names: HashMap<String, usize> = HashMap::new();

    for combination in matrix::expand(&definition.variables) {
        let set = synthesizer.synthesize(image, combination)?;
        if is_excluded(&set, &definition.excludes) {
            tracing::debug!(image, variables = ?set.variables, "excluded");
            plan.excluded += 1;
            continue;
        }
        let descriptor = ImageDescriptor::new(&set, workdir);
        if let Some(&taken) = names.get(descriptor.name()) {
            let (first, _) = &plan.entries[taken];
            return Err(SynthesisError::DuplicateName {
                image: image.to_owned(),
                name: descriptor.name().to_owned(),
                first: describe(&first.variables),
                second: describe(&set.variables),
            });
        }
        names.insert(descriptor.name().to_owned(), plan.entries.len());
        plan.entries.push((set, descriptor));
    }

    tracing::debug!(
        image,
        queued = plan.len(),
        excluded = plan.excluded,
        "planned image"
    );
    Ok(plan)
}

fn describe(combination: &Combination) -> String {
    let pairs: Vec<String> = combination
        .iter()
        .map(|(key, value)| format!("{key}={}", value_text(value)))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}
