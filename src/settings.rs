use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::renderer::passes::{AmbientSettings, GBufferSettings, LightingSettings, SsaoSettings, SurfaceSettings};
use crate::renderer::postprocess::PostSettings;

/// Configuration of the whole pipeline, one section per pass.
///
/// The post-process sections (`dof`, `god_rays`, `edge_aa`, `hdr`) sit at
/// the top level of the JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub begin: SurfaceSettings,
    #[serde(default)]
    pub gbuffer: GBufferSettings,
    #[serde(default)]
    pub lighting: LightingSettings,
    #[serde(default)]
    pub ambient: AmbientSettings,
    #[serde(default)]
    pub ssao: SsaoSettings,
    #[serde(flatten)]
    pub post: PostSettings,
    /// Language every pass compiles for unless it names its own.
    #[serde(default)]
    pub shader_language: String,
}

impl PipelineSettings {
    pub fn load() -> Self {
        Self::load_from_path("pipeline.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(settings) => {
                    info!("Loaded pipeline settings from {:?}", path);
                    settings
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default pipeline settings.",
                        path, err
                    );
                    PipelineSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Pipeline settings file {:?} not found. Using default settings.",
                    path
                );
                PipelineSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default pipeline settings.",
                    path, err
                );
                PipelineSettings::default()
            }
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<PipelineSettings>(contents).map(Self::validate)
    }

    /// Clamps degenerate values and hands the global shader language to
    /// every pass without an override of its own.
    pub fn validate(mut self) -> Self {
        if self.begin.samples == 0 {
            warn!("Surface sample count must be greater than zero. Using 1 instead.");
            self.begin.samples = 1;
        }
        if let Some((width, height)) = self.begin.custom_size {
            if width == 0 || height == 0 {
                warn!("Surface size must be greater than zero. Using the viewport size.");
                self.begin.custom_size = None;
            }
        }
        if let Some((width, height)) = self.gbuffer.custom_size {
            if width == 0 || height == 0 {
                warn!("GBuffer size must be greater than zero. Using the viewport size.");
                self.gbuffer.custom_size = None;
            }
        }
        if self.ambient.intensity < 0.0 {
            warn!("Ambient intensity cannot be negative. Using 0.");
            self.ambient.intensity = 0.0;
        }
        if self.ssao.hbao.ao_radius * self.ssao.hbao.scene_scale <= 0.0 {
            warn!("HBAO radius must be positive; it will be clamped to the minimum.");
        }

        let dof = &mut self.post.dof.defaults;
        if dof.near_plane_depth > dof.focal_plane_depth || dof.focal_plane_depth > dof.far_plane_depth {
            warn!(
                "Depth of field planes out of order (near {}, focal {}, far {}); sorting them.",
                dof.near_plane_depth, dof.focal_plane_depth, dof.far_plane_depth
            );
            let mut planes = [dof.near_plane_depth, dof.focal_plane_depth, dof.far_plane_depth];
            planes.sort_by(f32::total_cmp);
            [dof.near_plane_depth, dof.focal_plane_depth, dof.far_plane_depth] = planes;
        }

        let hdr = &mut self.post.hdr;
        if hdr.min_luminance > hdr.max_luminance {
            warn!("HDR luminance range is inverted. Swapping min and max.");
            std::mem::swap(&mut hdr.min_luminance, &mut hdr.max_luminance);
        }
        if hdr.gamma <= 0.0 {
            warn!("Gamma must be greater than zero. Using 2.2.");
            hdr.gamma = 2.2;
        }

        self.apply_shader_language();
        self
    }

    fn apply_shader_language(&mut self) {
        let global = self.shader_language.trim().to_string();
        if global.is_empty() {
            return;
        }
        let overrides = [
            &mut self.begin.shader_language,
            &mut self.gbuffer.shader_language,
            &mut self.lighting.shader_language,
            &mut self.ambient.shader_language,
            &mut self.ssao.shader_language,
            &mut self.post.dof.shader_language,
            &mut self.post.god_rays.shader_language,
            &mut self.post.edge_aa.shader_language,
            &mut self.post.hdr.shader_language,
        ];
        for language in overrides {
            if language.trim().is_empty() {
                language.clone_from(&global);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let mut settings = PipelineSettings::default();
        settings.begin.samples = 0;
        settings.begin.custom_size = Some((0, 720));
        settings.ambient.intensity = -1.0;
        settings.post.hdr.gamma = 0.0;

        let validated = settings.validate();
        assert_eq!(validated.begin.samples, 1);
        assert_eq!(validated.begin.custom_size, None);
        assert_eq!(validated.ambient.intensity, 0.0);
        assert_eq!(validated.post.hdr.gamma, 2.2);
    }

    #[test]
    fn validate_sorts_depth_of_field_planes() {
        let mut settings = PipelineSettings::default();
        settings.post.dof.defaults.near_plane_depth = 10.0;
        settings.post.dof.defaults.focal_plane_depth = 5.0;
        settings.post.dof.defaults.far_plane_depth = 1.0;

        let dof = settings.validate().post.dof.defaults;
        assert_eq!(
            (dof.near_plane_depth, dof.focal_plane_depth, dof.far_plane_depth),
            (1.0, 5.0, 10.0)
        );
    }

    #[test]
    fn global_language_fills_empty_overrides_only() {
        let mut settings = PipelineSettings {
            shader_language: "wgsl".to_string(),
            ..PipelineSettings::default()
        };
        settings.lighting.shader_language = "glsl".to_string();

        let validated = settings.validate();
        assert_eq!(validated.gbuffer.shader_language, "wgsl");
        assert_eq!(validated.post.hdr.shader_language, "wgsl");
        assert_eq!(validated.lighting.shader_language, "glsl");
    }

    #[test]
    fn post_sections_parse_at_top_level() {
        let settings = PipelineSettings::from_json(
            r#"{ "dof": { "enabled": true, "blur_passes": 3 }, "hdr": { "key": 0.25 } }"#,
        )
        .unwrap();
        assert!(settings.post.dof.enabled);
        assert_eq!(settings.post.dof.blur_passes, 3);
        assert_eq!(settings.post.hdr.key, 0.25);
        assert!(settings.post.hdr.enabled);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = PipelineSettings::load_from_path("definitely/not/here.json");
        assert_eq!(settings.begin.samples, 1);
        assert!(!settings.post.dof.enabled);
    }
}
