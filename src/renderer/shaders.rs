// src/renderer/shaders.rs
//
// Program templates of every pass. Full-screen passes share one vertex
// stage; `common` carries the uniform block and texture declarations.

use crate::renderer::program::ProgramTemplate;

const FULLSCREEN: &str = include_str!("../shader/fullscreen.wgsl");

macro_rules! fullscreen_template {
    ($name:literal) => {
        ProgramTemplate {
            name: $name,
            common: include_str!(concat!("../shader/", $name, ".common.wgsl")),
            vertex: FULLSCREEN,
            fragment: include_str!(concat!("../shader/", $name, ".wgsl")),
        }
    };
}

pub const COPY: ProgramTemplate = fullscreen_template!("copy");

pub const GBUFFER: ProgramTemplate = ProgramTemplate {
    name: "gbuffer",
    common: include_str!("../shader/gbuffer.common.wgsl"),
    vertex: include_str!("../shader/gbuffer.vert.wgsl"),
    fragment: include_str!("../shader/gbuffer.wgsl"),
};

pub const AMBIENT: ProgramTemplate = fullscreen_template!("ambient");
pub const LIGHTING: ProgramTemplate = fullscreen_template!("lighting");
pub const HBAO: ProgramTemplate = fullscreen_template!("hbao");
pub const HDAO: ProgramTemplate = fullscreen_template!("hdao");
pub const AO_BLUR: ProgramTemplate = fullscreen_template!("ao_blur");
pub const AO_COMPOSITE: ProgramTemplate = fullscreen_template!("ao_composite");
pub const DOF: ProgramTemplate = fullscreen_template!("dof");
pub const GOD_RAYS: ProgramTemplate = fullscreen_template!("god_rays");
pub const EDGE_AA: ProgramTemplate = fullscreen_template!("edge_aa");
pub const HDR: ProgramTemplate = fullscreen_template!("hdr");

/// Every template, for tooling that validates them all.
pub const ALL: [&ProgramTemplate; 12] = [
    &COPY,
    &GBUFFER,
    &AMBIENT,
    &LIGHTING,
    &HBAO,
    &HDAO,
    &AO_BLUR,
    &AO_COMPOSITE,
    &DOF,
    &GOD_RAYS,
    &EDGE_AA,
    &HDR,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::program::preprocess;

    #[test]
    fn templates_preprocess_without_defines() {
        for template in ALL {
            for source in [template.common, template.vertex, template.fragment] {
                preprocess(template.name, source, &[]).unwrap();
            }
        }
    }

    #[test]
    fn fullscreen_templates_share_the_vertex_stage() {
        assert!(ALL
            .iter()
            .filter(|t| t.name != "gbuffer")
            .all(|t| t.vertex.contains("fn vs_main") && t.vertex.contains("QuadInput")));
    }
}
