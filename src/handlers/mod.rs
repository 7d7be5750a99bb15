pub mod chat;
pub mod fallback;
pub mod history;

pub use chat::*;
pub use fallback::*;
pub use history::*;
