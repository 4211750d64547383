mod settings;

pub use settings::{
    DatabaseConfig, IceServerConfig, IceSettings, RoomsConfig, ServerConfig, SessionConfig,
    Settings, StoreConfig, SweeperConfig, ROOM_CAPACITY,
};
