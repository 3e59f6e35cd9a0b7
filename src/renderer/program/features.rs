use bitflags::{bitflags, Flags};

/// Feature bits of one program variant, split per stage.
///
/// `fragment` always carries the full set; `vertex` only the bits the vertex
/// stage reacts to, so two variants that differ only in fragment features
/// still share identical vertex source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ShaderFeatureMask {
    pub vertex: u32,
    pub fragment: u32,
}

impl ShaderFeatureMask {
    pub const EMPTY: Self = Self {
        vertex: 0,
        fragment: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.vertex == 0 && self.fragment == 0
    }
}

impl std::fmt::Display for ShaderFeatureMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{:#x}:f{:#x}", self.vertex, self.fragment)
    }
}

/// A per-pass `bitflags` set whose flag names double as shader defines.
pub trait FeatureSet: Flags<Bits = u32> + Copy {
    /// Flags the vertex stage reads.
    fn vertex_stage() -> Self;

    fn to_mask(self) -> ShaderFeatureMask {
        ShaderFeatureMask {
            vertex: self.bits() & Self::vertex_stage().bits(),
            fragment: self.bits(),
        }
    }

    /// Names of the flags set in `bits`, in declaration order.
    fn defines(bits: u32) -> Vec<&'static str> {
        Self::from_bits_truncate(bits)
            .iter_names()
            .map(|(name, _)| name)
            .collect()
    }
}

bitflags! {
    /// Feature set of passes with a single program variant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NoFeatures: u32 {}
}

impl FeatureSet for NoFeatures {
    fn vertex_stage() -> Self {
        Self::empty()
    }
}

/// The define a shader language contributes, e.g. `SHADER_LANGUAGE_WGSL`.
pub fn language_define(language: &str) -> String {
    let normalized: String = language
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SHADER_LANGUAGE_{}", normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    bitflags! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        struct TestFeatures: u32 {
            const SKINNED = 1 << 0;
            const TEXTURED = 1 << 1;
        }
    }

    impl FeatureSet for TestFeatures {
        fn vertex_stage() -> Self {
            Self::SKINNED
        }
    }

    #[test]
    fn vertex_submask_keeps_only_vertex_bits() {
        let mask = (TestFeatures::SKINNED | TestFeatures::TEXTURED).to_mask();
        assert_eq!(mask.vertex, TestFeatures::SKINNED.bits());
        assert_eq!(mask.fragment, 0b11);
    }

    #[test]
    fn defines_follow_flag_names() {
        assert_eq!(TestFeatures::defines(0b10), vec!["TEXTURED"]);
        assert!(TestFeatures::defines(0).is_empty());
    }

    #[test]
    fn language_define_is_sanitized() {
        assert_eq!(language_define("wgsl"), "SHADER_LANGUAGE_WGSL");
        assert_eq!(language_define("glsl-330"), "SHADER_LANGUAGE_GLSL_330");
    }
}
