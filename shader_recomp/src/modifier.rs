//! Text transforms applied to decompiled shader source before recompilation.
//!
//! The transforms recognize the layout produced by the AssetRipper decompiler
//! rather than arbitrary ShaderLab source. All recognized patterns live in
//! this module so a real parser could replace them later without touching
//! the pipeline or the build orchestrator.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::bundle::VrRenderingMode;

const PASS_START: &str = "Pass {";
const PASS_END: &str = "ENDCG";

const SETUP_INSTANCE_ID: &str = "UNITY_SETUP_INSTANCE_ID(v);";
const INITIALIZE_OUTPUT: &str = "UNITY_INITIALIZE_OUTPUT(v2f, o);";
const INITIALIZE_STEREO_OUTPUT: &str = "UNITY_INITIALIZE_VERTEX_OUTPUT_STEREO(o);";
const VERTEX_OUTPUT_STEREO: &str = "UNITY_VERTEX_OUTPUT_STEREO";

/// A vertex entry point immediately followed by the declaration of its output.
static VERTEX_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v2f\s+vert\(appdata_full\s+v\)\s*\{\s*v2f\s+o;").unwrap());

/// The interpolator struct passed from the vertex to the fragment stage.
static OUTPUT_STRUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"struct v2f\s*\{[^}]*\};").unwrap());

/// The result of applying one modifier to a shader's source text.
#[derive(Debug, Clone, PartialEq)]
pub enum ModifyResult {
    /// The modifier does not apply to this shader or rendering mode.
    Unchanged,
    /// The source should be replaced with the new text.
    Rewritten(String),
    /// The shader cannot be safely transformed. No edits were applied.
    Failed(ModifyError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModifyError {
    #[error("pass at offset {0} has no following {PASS_END}")]
    UnterminatedPass(usize),

    #[error("extracted {extracted} pass blocks but found {markers} pass markers")]
    PassCountMismatch { extracted: usize, markers: usize },

    #[error("expected exactly one vertex entry point in pass block, found {0}")]
    VertexEntryMatches(usize),

    #[error("expected exactly one v2f struct in pass block, found {0}")]
    OutputStructMatches(usize),
}

/// A single text to text rewrite of one decompiled shader.
pub trait ShaderModifier {
    fn modify(&self, source: &str) -> ModifyResult;
}

/// Builds the immutable modifier chain for a run.
///
/// The literal fix always runs. The instancing transform only applies when
/// the selected mode actually renders both eyes in one pass.
pub fn modifiers_for_mode(mode: VrRenderingMode) -> Vec<Box<dyn ShaderModifier>> {
    let mut modifiers: Vec<Box<dyn ShaderModifier>> = vec![Box::new(FixNanModifier)];
    if mode == VrRenderingMode::SinglePassInstanced {
        modifiers.push(Box::new(AddInstancingModifier::new(mode)));
    }
    modifiers
}

/// Applies each modifier in order, carrying the latest rewritten text.
///
/// A failed modifier applies no edits and leaves the text as it was before
/// that modifier ran. Failures are returned so the caller can surface a
/// warning per shader instead of silently shipping unmodified source.
pub fn apply_modifiers(
    modifiers: &[Box<dyn ShaderModifier>],
    source: &str,
) -> (String, Vec<ModifyError>) {
    let mut text = source.to_string();
    let mut failures = Vec::new();
    for modifier in modifiers {
        match modifier.modify(&text) {
            ModifyResult::Unchanged => (),
            ModifyResult::Rewritten(new_text) => text = new_text,
            ModifyResult::Failed(e) => failures.push(e),
        }
    }
    (text, failures)
}

/// Replaces `NaN` literals with `0`.
///
/// The decompiler sometimes emits NaN for float literals,
/// which would otherwise fail to recompile.
pub struct FixNanModifier;

impl ShaderModifier for FixNanModifier {
    fn modify(&self, source: &str) -> ModifyResult {
        if source.contains("NaN") {
            ModifyResult::Rewritten(source.replace("NaN", "0"))
        } else {
            ModifyResult::Unchanged
        }
    }
}

/// Adds the macros required for single pass instanced rendering to every
/// pass of a shader.
///
/// Each pass needs the eye index set up in its vertex entry point and an
/// extra field in its interpolator struct. A half patched shader can compile
/// but render incorrectly for one eye, so a failed edit anywhere rejects the
/// whole shader and applies nothing.
///
/// Re-running the transform on an already patched vertex entry inserts the
/// setup macros a second time. The struct edit detects an existing field and
/// skips, but the vertex edit does not. Callers should not apply this
/// modifier to already patched source.
pub struct AddInstancingModifier {
    mode: VrRenderingMode,
}

impl AddInstancingModifier {
    pub fn new(mode: VrRenderingMode) -> Self {
        Self { mode }
    }
}

impl ShaderModifier for AddInstancingModifier {
    fn modify(&self, source: &str) -> ModifyResult {
        if self.mode != VrRenderingMode::SinglePassInstanced {
            return ModifyResult::Unchanged;
        }
        match add_instancing(source) {
            Ok(text) => ModifyResult::Rewritten(text),
            Err(e) => ModifyResult::Failed(e),
        }
    }
}

fn add_instancing(source: &str) -> Result<String, ModifyError> {
    let blocks = pass_blocks(source)?;
    let markers = source.matches(PASS_START).count();
    if blocks.len() != markers {
        return Err(ModifyError::PassCountMismatch {
            extracted: blocks.len(),
            markers,
        });
    }

    // Validate every pass before editing anything so that failure is
    // all or nothing for the whole shader.
    let mut insertions = Vec::new();
    for block in &blocks {
        let text = &source[block.clone()];
        insertions.push(vertex_entry_insertion(text, block.start)?);
        if let Some(insertion) = output_struct_insertion(text, block.start)? {
            insertions.push(insertion);
        }
    }

    // Offsets are relative to the original text, so apply back to front.
    let mut result = source.to_string();
    insertions.sort_by(|a, b| b.0.cmp(&a.0));
    for (offset, text) in insertions {
        result.insert_str(offset, &text);
    }
    Ok(result)
}

/// Finds each pass block as the range from a `Pass {` marker to the first
/// `ENDCG` marker after it.
fn pass_blocks(source: &str) -> Result<Vec<Range<usize>>, ModifyError> {
    let ends: Vec<_> = source.match_indices(PASS_END).map(|(i, _)| i).collect();

    let mut blocks = Vec::new();
    for (start, _) in source.match_indices(PASS_START) {
        let end = ends
            .iter()
            .copied()
            .find(|&end| end > start)
            .ok_or(ModifyError::UnterminatedPass(start))?;
        blocks.push(start..end);
    }
    Ok(blocks)
}

/// The stereo setup macros inserted after the vertex entry's output declaration.
fn vertex_entry_insertion(
    block: &str,
    block_start: usize,
) -> Result<(usize, String), ModifyError> {
    let matches: Vec<_> = VERTEX_ENTRY.find_iter(block).collect();
    if matches.len() != 1 {
        return Err(ModifyError::VertexEntryMatches(matches.len()));
    }
    let entry = matches[0];

    let indent = indent_after_brace(entry.as_str());
    let inserted = format!(
        "\n{indent}{SETUP_INSTANCE_ID}\n{indent}{INITIALIZE_OUTPUT}\n{indent}{INITIALIZE_STEREO_OUTPUT}"
    );
    Ok((block_start + entry.end(), inserted))
}

/// Infers the indentation unit from the first line of the matched body.
/// Decompiler output varies in indentation style, so a fixed unit would
/// produce visually inconsistent code.
fn indent_after_brace(matched: &str) -> &str {
    let body = matched.split_once('{').map(|(_, rest)| rest).unwrap_or("");
    let line = body.lines().nth(1).unwrap_or("");
    &line[..line.len() - line.trim_start().len()]
}

/// The stereo output field inserted before the interpolator struct's closing line.
/// Returns `None` if the struct already declares it.
fn output_struct_insertion(
    block: &str,
    block_start: usize,
) -> Result<Option<(usize, String)>, ModifyError> {
    let matches: Vec<_> = OUTPUT_STRUCT.find_iter(block).collect();
    if matches.len() != 1 {
        return Err(ModifyError::OutputStructMatches(matches.len()));
    }
    let definition = matches[0];
    if definition.as_str().contains(VERTEX_OUTPUT_STEREO) {
        return Ok(None);
    }

    // Insert just before the closing "};" line, one tab deeper than the
    // closing line itself.
    let closing = definition.as_str().rsplit('\n').next().unwrap_or("");
    let indent = "\t".repeat(closing.matches('\t').count() + 1);
    let offset = block_start + definition.end() - closing.len();
    Ok(Some((offset, format!("{indent}{VERTEX_OUTPUT_STEREO}\n"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn instancing() -> AddInstancingModifier {
        AddInstancingModifier::new(VrRenderingMode::SinglePassInstanced)
    }

    #[test]
    fn fix_nan_rewrites_literals() {
        let result = FixNanModifier.modify("float4 c = float4(NaN, NaN, 0, 1);");
        assert_eq!(
            ModifyResult::Rewritten("float4 c = float4(0, 0, 0, 1);".to_string()),
            result
        );
    }

    #[test]
    fn fix_nan_without_literal_is_unchanged() {
        assert_eq!(
            ModifyResult::Unchanged,
            FixNanModifier.modify("float4 c = float4(0, 0, 0, 1);")
        );
    }

    #[test]
    fn fix_nan_is_idempotent() {
        let once = match FixNanModifier.modify("half h = NaN;") {
            ModifyResult::Rewritten(text) => text,
            other => panic!("unexpected result {other:?}"),
        };
        assert_eq!(ModifyResult::Unchanged, FixNanModifier.modify(&once));
    }

    #[test]
    fn add_instancing_single_pass() {
        let shader = indoc! {r#"
            Shader "Custom/Glow" {
                SubShader {
                    Pass {
                        CGPROGRAM
                        #pragma vertex vert
                        #pragma fragment frag

                        struct v2f
                        {
                            float4 pos : SV_POSITION;
                            float2 uv : TEXCOORD0;
                        };

                        v2f vert(appdata_full v)
                        {
                            v2f o;
                            o.pos = UnityObjectToClipPos(v.vertex);
                            o.uv = v.texcoord;
                            return o;
                        }
                        ENDCG
                    }
                }
            }
        "#};

        let result = instancing().modify(shader);

        assert_eq!(
            ModifyResult::Rewritten(
                indoc! {r#"
                    Shader "Custom/Glow" {
                        SubShader {
                            Pass {
                                CGPROGRAM
                                #pragma vertex vert
                                #pragma fragment frag

                                struct v2f
                                {
                                    float4 pos : SV_POSITION;
                                    float2 uv : TEXCOORD0;
                    	UNITY_VERTEX_OUTPUT_STEREO
                                };

                                v2f vert(appdata_full v)
                                {
                                    v2f o;
                                    UNITY_SETUP_INSTANCE_ID(v);
                                    UNITY_INITIALIZE_OUTPUT(v2f, o);
                                    UNITY_INITIALIZE_VERTEX_OUTPUT_STEREO(o);
                                    o.pos = UnityObjectToClipPos(v.vertex);
                                    o.uv = v.texcoord;
                                    return o;
                                }
                                ENDCG
                            }
                        }
                    }
                "#}
                .to_string()
            ),
            result
        );

        // The edits never add or remove passes.
        if let ModifyResult::Rewritten(text) = result {
            assert_eq!(
                shader.matches(PASS_START).count(),
                text.matches(PASS_START).count()
            );
        }
    }

    #[test]
    fn add_instancing_other_modes_unchanged() {
        let shader = "Pass {\nENDCG\n";
        for mode in [
            VrRenderingMode::None,
            VrRenderingMode::SinglePass,
            VrRenderingMode::MultiPass,
        ] {
            assert_eq!(
                ModifyResult::Unchanged,
                AddInstancingModifier::new(mode).modify(shader)
            );
        }
    }

    #[test]
    fn add_instancing_every_pass() {
        let pass = indoc! {r#"
            Pass {
                CGPROGRAM
                struct v2f
                {
                    float4 pos : SV_POSITION;
                };
                v2f vert(appdata_full v)
                {
                    v2f o;
                    return o;
                }
                ENDCG
            }
        "#};
        let shader = format!("{pass}\n{pass}");

        match instancing().modify(&shader) {
            ModifyResult::Rewritten(text) => {
                assert_eq!(2, text.matches(SETUP_INSTANCE_ID).count());
                assert_eq!(2, text.matches(INITIALIZE_OUTPUT).count());
                assert_eq!(2, text.matches(INITIALIZE_STEREO_OUTPUT).count());
                assert_eq!(2, text.matches("\tUNITY_VERTEX_OUTPUT_STEREO\n").count());
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn unterminated_pass_fails() {
        let shader = indoc! {r#"
            Pass {
                CGPROGRAM
                // no end marker
        "#};
        assert_eq!(
            ModifyResult::Failed(ModifyError::UnterminatedPass(0)),
            instancing().modify(shader)
        );
    }

    #[test]
    fn missing_vertex_entry_fails() {
        let shader = indoc! {r#"
            Pass {
                struct v2f
                {
                    float4 pos : SV_POSITION;
                };
                ENDCG
            }
        "#};
        assert_eq!(
            ModifyResult::Failed(ModifyError::VertexEntryMatches(0)),
            instancing().modify(shader)
        );
    }

    #[test]
    fn duplicate_vertex_entry_fails() {
        let shader = indoc! {r#"
            Pass {
                struct v2f
                {
                    float4 pos : SV_POSITION;
                };
                v2f vert(appdata_full v)
                {
                    v2f o;
                    return o;
                }
                v2f vert(appdata_full v)
                {
                    v2f o;
                    return o;
                }
                ENDCG
            }
        "#};
        assert_eq!(
            ModifyResult::Failed(ModifyError::VertexEntryMatches(2)),
            instancing().modify(shader)
        );
    }

    #[test]
    fn duplicate_output_struct_fails() {
        let shader = indoc! {r#"
            Pass {
                struct v2f
                {
                    float4 pos : SV_POSITION;
                };
                struct v2f
                {
                    float4 pos : SV_POSITION;
                };
                v2f vert(appdata_full v)
                {
                    v2f o;
                    return o;
                }
                ENDCG
            }
        "#};
        assert_eq!(
            ModifyResult::Failed(ModifyError::OutputStructMatches(2)),
            instancing().modify(shader)
        );
    }

    #[test]
    fn patched_output_struct_is_skipped() {
        let shader = indoc! {r#"
            Pass {
                struct v2f
                {
                    float4 pos : SV_POSITION;
                    UNITY_VERTEX_OUTPUT_STEREO
                };
                v2f vert(appdata_full v)
                {
                    v2f o;
                    return o;
                }
                ENDCG
            }
        "#};

        match instancing().modify(shader) {
            ModifyResult::Rewritten(text) => {
                // The existing field is the only one. The vertex macros are
                // still inserted.
                assert_eq!(1, text.matches(VERTEX_OUTPUT_STEREO).count());
                assert_eq!(1, text.matches(SETUP_INSTANCE_ID).count());
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn vertex_edit_is_not_idempotent() {
        let shader = indoc! {r#"
            Pass {
                struct v2f
                {
                    float4 pos : SV_POSITION;
                };
                v2f vert(appdata_full v)
                {
                    v2f o;
                    return o;
                }
                ENDCG
            }
        "#};

        let once = match instancing().modify(shader) {
            ModifyResult::Rewritten(text) => text,
            other => panic!("unexpected result {other:?}"),
        };
        let twice = match instancing().modify(&once) {
            ModifyResult::Rewritten(text) => text,
            other => panic!("unexpected result {other:?}"),
        };

        // The struct edit detects the existing field, but the vertex entry
        // is patched a second time.
        assert_eq!(1, twice.matches("\tUNITY_VERTEX_OUTPUT_STEREO\n").count());
        assert_eq!(2, twice.matches(SETUP_INSTANCE_ID).count());
    }

    #[test]
    fn chain_keeps_text_from_before_a_failed_modifier() {
        let modifiers = modifiers_for_mode(VrRenderingMode::SinglePassInstanced);
        // NaN is fixable, but the pass has no vertex entry.
        let shader = "float f = NaN;\nPass {\nENDCG\n";

        let (text, failures) = apply_modifiers(&modifiers, shader);

        assert_eq!("float f = 0;\nPass {\nENDCG\n", text);
        assert_eq!(vec![ModifyError::VertexEntryMatches(0)], failures);
    }

    #[test]
    fn chain_for_other_modes_has_no_instancing() {
        let modifiers = modifiers_for_mode(VrRenderingMode::SinglePass);
        let (text, failures) = apply_modifiers(&modifiers, "Pass {\nENDCG\n");
        assert_eq!("Pass {\nENDCG\n", text);
        assert!(failures.is_empty());
    }
}
