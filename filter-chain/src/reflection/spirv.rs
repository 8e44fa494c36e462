//! SPIR-V front door for reflection.

use crate::error::{FilterChainError, Result};

use super::{ReflectionContext, ShaderReflection, reflect_modules};

/// Parse a SPIR-V binary into a naga module.
pub fn parse_spirv(words: &[u32]) -> Result<naga::Module> {
    if words.is_empty() {
        return Err(FilterChainError::reflection("empty SPIR-V binary"));
    }
    let options = naga::front::spv::Options {
        adjust_coordinate_space: false,
        ..Default::default()
    };
    naga::front::spv::Frontend::new(words.iter().copied(), &options)
        .parse()
        .map_err(|e| FilterChainError::reflection(format!("SPIR-V parse error: {e}")))
}

/// Reflect a vertex/fragment SPIR-V pair.
pub fn reflect_spirv(
    vertex: &[u32],
    fragment: &[u32],
    ctx: ReflectionContext<'_>,
) -> Result<ShaderReflection> {
    let vertex = parse_spirv(vertex)?;
    let fragment = parse_spirv(fragment)?;
    reflect_modules(&vertex, &fragment, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_spirv(&[]).is_err());
        assert!(matches!(
            parse_spirv(&[0xdead_beef, 1, 2, 3, 4]),
            Err(FilterChainError::Reflection(_))
        ));
    }
}
