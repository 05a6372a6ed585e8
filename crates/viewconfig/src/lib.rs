use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Render mode as written in a view configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderModeSetting {
    WhenDirty,
    #[default]
    Continuously,
}

impl RenderModeSetting {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::WhenDirty),
            1 => Some(Self::Continuously),
            _ => None,
        }
    }
}

impl std::str::FromStr for RenderModeSetting {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_render_mode(raw)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewConfig {
    pub version: u32,
    #[serde(default)]
    pub view: ViewSection,
    #[serde(default)]
    pub surface: SurfaceSection,
    #[serde(default)]
    pub debug: DebugSection,
    #[serde(default)]
    pub demo: DemoSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewSection {
    #[serde(default, deserialize_with = "deserialize_render_mode_opt")]
    pub render_mode: Option<RenderModeSetting>,
    #[serde(default)]
    pub preserve_context_on_pause: bool,
    #[serde(default = "default_client_version")]
    pub context_client_version: u32,
}

impl Default for ViewSection {
    fn default() -> Self {
        Self {
            render_mode: None,
            preserve_context_on_pause: false,
            context_client_version: default_client_version(),
        }
    }
}

/// Requested drawable configuration. Either `depth_buffer` (RGB888 with an
/// optional 16-bit depth buffer) or explicit component sizes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SurfaceSection {
    #[serde(default)]
    pub depth_buffer: Option<bool>,
    #[serde(default)]
    pub red: Option<u8>,
    #[serde(default)]
    pub green: Option<u8>,
    #[serde(default)]
    pub blue: Option<u8>,
    #[serde(default)]
    pub alpha: Option<u8>,
    #[serde(default)]
    pub depth: Option<u8>,
    #[serde(default)]
    pub stencil: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DebugSection {
    #[serde(default)]
    pub check_errors: bool,
    #[serde(default)]
    pub log_calls: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DemoSection {
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSizes {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
    pub depth: u8,
    pub stencil: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRequest {
    Simple { depth_buffer: bool },
    Components(ComponentSizes),
}

fn default_client_version() -> u32 {
    3
}

fn deserialize_render_mode_opt<'de, D>(
    deserializer: D,
) -> Result<Option<RenderModeSetting>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Num(i64),
    }

    let helper: Option<Helper> = Option::deserialize(deserializer)?;
    let result = match helper {
        None => None,
        Some(Helper::Str(raw)) => Some(parse_render_mode(&raw).map_err(de::Error::custom)?),
        Some(Helper::Num(code)) => Some(
            RenderModeSetting::from_code(code)
                .ok_or_else(|| de::Error::custom(format!("invalid render mode code {code}")))?,
        ),
    };
    Ok(result)
}

fn parse_render_mode(raw: &str) -> Result<RenderModeSetting, String> {
    let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
    match normalized.as_str() {
        "when-dirty" | "dirty" | "on-demand" => Ok(RenderModeSetting::WhenDirty),
        "continuously" | "continuous" => Ok(RenderModeSetting::Continuously),
        other => Err(format!("invalid render mode '{other}'")),
    }
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            version: 1,
            view: ViewSection::default(),
            surface: SurfaceSection::default(),
            debug: DebugSection::default(),
            demo: DemoSection::default(),
        }
    }
}

impl ViewConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ViewConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn render_mode(&self) -> RenderModeSetting {
        self.view.render_mode.unwrap_or_default()
    }

    /// Resolves the `[surface]` table into a single request. An empty table
    /// asks for RGB888 with a depth buffer.
    pub fn surface_request(&self) -> SurfaceRequest {
        let surface = &self.surface;
        match (surface.red, surface.green, surface.blue) {
            (Some(red), Some(green), Some(blue)) => SurfaceRequest::Components(ComponentSizes {
                red,
                green,
                blue,
                alpha: surface.alpha.unwrap_or(0),
                depth: surface.depth.unwrap_or(0),
                stencil: surface.stencil.unwrap_or(0),
            }),
            _ => SurfaceRequest::Simple {
                depth_buffer: surface.depth_buffer.unwrap_or(true),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let client_version = self.view.context_client_version;
        if !(1..=3).contains(&client_version) {
            return Err(ConfigError::Invalid(format!(
                "view.context_client_version must be 1, 2 or 3 (got {client_version})"
            )));
        }

        let surface = &self.surface;
        let colors = [surface.red, surface.green, surface.blue];
        let given = colors.iter().filter(|value| value.is_some()).count();
        if given != 0 && given != colors.len() {
            return Err(ConfigError::Invalid(
                "surface.red, surface.green and surface.blue must be given together".into(),
            ));
        }
        if given == 0
            && (surface.alpha.is_some() || surface.depth.is_some() || surface.stencil.is_some())
        {
            return Err(ConfigError::Invalid(
                "surface component sizes require surface.red, surface.green and surface.blue"
                    .into(),
            ));
        }
        if given != 0 && surface.depth_buffer.is_some() {
            return Err(ConfigError::Invalid(
                "surface.depth_buffer cannot be combined with explicit component sizes".into(),
            ));
        }

        if let Some(duration) = self.demo.duration {
            if duration.is_zero() {
                return Err(ConfigError::Invalid(
                    "demo.duration must be greater than zero".into(),
                ));
            }
        }
        if self.demo.width == Some(0) || self.demo.height == Some(0) {
            return Err(ConfigError::Invalid(
                "demo.width and demo.height must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[view]
render_mode = "when-dirty"
preserve_context_on_pause = true
context_client_version = 2

[surface]
red = 8
green = 8
blue = 8
alpha = 8
depth = 24

[debug]
log_calls = true

[demo]
duration = "1500ms"
width = 640
height = 480
"#;

    #[test]
    fn parses_sample_config() {
        let config = ViewConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.render_mode(), RenderModeSetting::WhenDirty);
        assert!(config.view.preserve_context_on_pause);
        assert_eq!(config.view.context_client_version, 2);
        assert!(config.debug.log_calls);
        assert!(!config.debug.check_errors);
        assert_eq!(config.demo.duration, Some(Duration::from_millis(1500)));
        assert_eq!(
            config.surface_request(),
            SurfaceRequest::Components(ComponentSizes {
                red: 8,
                green: 8,
                blue: 8,
                alpha: 8,
                depth: 24,
                stencil: 0,
            })
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = ViewConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config.render_mode(), RenderModeSetting::Continuously);
        assert_eq!(config.view.context_client_version, 3);
        assert_eq!(
            config.surface_request(),
            SurfaceRequest::Simple { depth_buffer: true }
        );
    }

    #[test]
    fn accepts_numeric_render_mode() {
        let config = ViewConfig::from_toml_str(
            r#"
version = 1

[view]
render_mode = 0
"#,
        )
        .unwrap();
        assert_eq!(config.render_mode(), RenderModeSetting::WhenDirty);

        let err = ViewConfig::from_toml_str(
            r#"
version = 1

[view]
render_mode = 7
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_partial_component_sizes() {
        let err = ViewConfig::from_toml_str(
            r#"
version = 1

[surface]
red = 5
green = 6
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = ViewConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("view.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = ViewConfig::load(&path).unwrap();
        assert_eq!(config.demo.width, Some(640));

        let missing = ViewConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
