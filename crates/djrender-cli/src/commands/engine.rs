//! Engine selection for the CLI.

use djrender_core::DecodeEngine;

/// The engine the binary was built with.
#[cfg(feature = "djvulibre")]
pub fn default_engine() -> Box<dyn DecodeEngine> {
    Box::new(djrender_core::DdjvuEngine::new())
}

/// Without `djvulibre` only foreign documents can be inspected; native ones
/// fail to open.
#[cfg(not(feature = "djvulibre"))]
pub fn default_engine() -> Box<dyn DecodeEngine> {
    tracing::warn!("Built without the djvulibre feature, DjVu documents cannot be decoded");
    Box::new(djrender_core::MemoryEngine::new())
}
