pub mod cdp;
pub mod host;
pub mod launcher;

pub use cdp::CdpClient;
pub use host::ChromeHost;
pub use launcher::{find_browser_binary, LaunchedBrowser};
