mod engine;
mod ops;
mod server;

pub use engine::Engine;
pub use ops::OpResponse;
pub use server::{Request, Response, run_stdio_server};
