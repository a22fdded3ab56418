pub mod daemon;
pub mod init;
pub mod meta;
pub mod sync;
pub mod version;

pub use daemon::Daemon;
pub use init::Init;
pub use meta::Meta;
pub use sync::SyncOnce;
pub use version::Version;
