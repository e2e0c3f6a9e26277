pub mod config;
pub mod settings;
pub mod transport;
pub mod trust;

pub use config::RemoteConfig;
pub use settings::{RemoteSettings, SettingsStore};
pub use transport::{
    encode_png, HttpTransport, SubmitError, Transport, TransportSlot, SEND_TIMEOUT_SECS,
};
pub use trust::{
    CompositeTrustManager, PinnedCertificateTrustManager, RootStoreTrustManager, TrustError,
    TrustManager,
};
