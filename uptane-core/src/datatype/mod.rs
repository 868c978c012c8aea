pub mod config;
pub mod error;
pub mod manifest;
pub mod role;
pub mod target;
pub mod tuf;
pub mod util;

pub use self::config::{Config, DeviceConfig, RepoConfig, UptaneConfig};
pub use self::error::Error;
pub use self::manifest::{EcuCustom, EcuManifest, EcuVersion, InstallCode, InstalledVersion,
                          OperationResult};
pub use self::role::{KeyKind, KeyType, RepositoryType, RoleName};
pub use self::target::{Target, TargetCustom};
pub use self::tuf::{Key, KeyValue, RoleData, RoleMeta, Signature, SignatureMethod, SignedMetadata};
pub use self::util::Util;
