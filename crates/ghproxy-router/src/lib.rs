pub mod proxy;

pub use proxy::{ProxyState, proxy_router};
