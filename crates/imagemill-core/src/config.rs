use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// A partial key/value map; a config set matching every entry is skipped.
pub type Exclusion = BTreeMap<String, Value>;

/// Build file configuration (usually `build.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Registry host prepended to every tag
    #[serde(default)]
    pub registry: String,
    /// Repository prefix placed between registry and tag
    #[serde(default)]
    pub prefix: String,
    /// Maintainer, exposed as `maintainer` and OCI authors labels
    #[serde(default)]
    pub maintainer: String,
    /// Labels applied to every image
    #[serde(default, deserialize_with = "string_map")]
    pub labels: BTreeMap<String, String>,
    /// Build arguments applied to every image
    #[serde(default, deserialize_with = "string_map")]
    pub args: BTreeMap<String, String>,
    /// Default target platforms
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Default engine options
    #[serde(default)]
    pub options: BuildOptions,
    /// Image definitions, in the order they were declared.
    /// Declaration order is the build order.
    #[serde(default, deserialize_with = "ordered_images")]
    pub images: Vec<(String, ImageDefinition)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageDefinition {
    /// Path to the Dockerfile, relative to the build file.
    /// A `.tpl` suffix marks it as a template rendered per combination.
    pub dockerfile: String,
    /// Variable axes expanded into the build matrix
    #[serde(default)]
    pub variables: BTreeMap<String, Axis>,
    /// Combinations to skip
    #[serde(default)]
    pub excludes: Vec<Exclusion>,
    /// Tag templates
    #[serde(default, deserialize_with = "string_list")]
    pub tags: Vec<String>,
    /// Label templates, applied after global and provenance labels
    #[serde(default, deserialize_with = "string_map")]
    pub labels: BTreeMap<String, String>,
    /// Build argument templates
    #[serde(default, deserialize_with = "string_map")]
    pub args: BTreeMap<String, String>,
    /// Platforms; replaces the global list when non-empty
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Engine options; set fields override the global options
    #[serde(default)]
    pub options: BuildOptions,
}

/// One variable axis of an image definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Axis {
    /// `alpine: ["3.19", "3.20"]`: one branch per element
    List(Vec<Value>),
    /// `variant: {slim: a, full: b}`: one branch per entry, each a single-entry map
    Alternatives(Mapping),
    /// `timezone: UTC`: exactly one branch
    Scalar(Value),
}

impl Axis {
    /// Number of branches this axis contributes to the matrix.
    pub fn cardinality(&self) -> usize {
        match self {
            Axis::List(values) => values.len(),
            Axis::Alternatives(entries) => entries.len(),
            Axis::Scalar(_) => 1,
        }
    }
}

/// Engine-specific knobs, declared globally or per image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildOptions {
    /// Squash this image even when `--squash` was not given
    #[serde(default)]
    pub squash: Option<bool>,
    /// Raw arguments appended to the engine's build command
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl BuildOptions {
    /// Field-by-field overlay: values set in `self` win over `base`.
    pub fn over(&self, base: &BuildOptions) -> BuildOptions {
        BuildOptions {
            squash: self.squash.or(base.squash),
            extra_args: if self.extra_args.is_empty() {
                base.extra_args.clone()
            } else {
                self.extra_args.clone()
            },
        }
    }
}

impl Config {
    /// Load and parse a build file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        tracing::debug!(path = %path.display(), "loading build file");
        let content = std::fs::read_to_string(path).map_err(|e| crate::Error::ConfigLoad {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn image(&self, name: &str) -> Option<&ImageDefinition> {
        self.images
            .iter()
            .find(|(image, _)| image == name)
            .map(|(_, definition)| definition)
    }

    pub fn image_names(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(|(name, _)| name.as_str())
    }
}

// ── Deserialization helpers ──

fn ordered_images<'de, D>(deserializer: D) -> Result<Vec<(String, ImageDefinition)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ImagesVisitor;

    impl<'de> Visitor<'de> for ImagesVisitor {
        type Value = Vec<(String, ImageDefinition)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of image name to image definition")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut images: Vec<(String, ImageDefinition)> =
                Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, definition)) = map.next_entry::<String, ImageDefinition>()? {
                if images.iter().any(|(existing, _)| *existing == name) {
                    return Err(de::Error::custom(format!("duplicate image '{name}'")));
                }
                images.push((name, definition));
            }
            Ok(images)
        }
    }

    deserializer.deserialize_map(ImagesVisitor)
}

/// Accepts any scalar (`version: 1`, `debug: true`) where a string is expected.
fn scalar_text<E: de::Error>(value: Value) -> Result<String, E> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(E::custom(format!("expected a scalar, found {other:?}"))),
    }
}

fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(k, v)| Ok((k, scalar_text(v)?)))
        .collect()
}

fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default().into_iter().map(scalar_text).collect()
}
