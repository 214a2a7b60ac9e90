//! Asset decoders producing CPU-side data (meshes, textures, shaders).
//! Nothing here touches the GPU; these run on the resource worker thread.

pub mod mesh;
pub mod obj;
pub mod shader;
pub mod texture;
