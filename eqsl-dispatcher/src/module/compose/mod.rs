///! Card compositing
///!
///! Template fetching and decoding, overlay planning, and the external
///! renderer boundary.

pub mod compositor;
pub mod renderer;
pub mod template_cache;

pub use compositor::{ComposeStyle, ImageCompositor};
pub use renderer::{RenderError, Renderer, SubprocessRenderer, TextField};
pub use template_cache::{CachedTemplate, TemplateCache};
