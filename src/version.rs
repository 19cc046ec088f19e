pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = "camwatch developers";
