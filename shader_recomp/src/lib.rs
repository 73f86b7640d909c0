//! Shaders in Unity asset bundles are precompiled for a fixed stereo rendering path.
//! shader_recomp can rebuild them for a different path like single pass instanced rendering.
//! Each bundle's shader bytecode is first decompiled back into .shader source using AssetRipper.
//! The decompiled source is rewritten to add the stereo instancing macros
//! since support for the eye index is compiled into the vertex code itself.
//! The rewritten sources are then recompiled into a standalone .shaderbundle file
//! by the Unity editor running unattended in batch mode,
//! which also loads the rebuilt bundle to verify that every shader is still usable.

pub mod bundle;
pub mod decompile;
pub mod error;
pub mod modifier;
pub mod pipeline;
pub mod recompile;
