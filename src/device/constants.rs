/**
 * Connection state name reported by the engine for a band that is fully connected.
 */
pub const CONNECTED: &str = "CONNECTED";

/**
 * Connection state name reported by the engine for a band that is not connected.
 * Bands with an unknown state are also reported as DISCONNECTED to readers.
 */
pub const DISCONNECTED: &str = "DISCONNECTED";

/**
 * How long (milliseconds) without any event-stream traffic before the engine is considered lost.
 */
pub const HEARTBEAT_TIMEOUT: u64 = 3000;

/**
 * How long (milliseconds) to wait for the reply to a request.
 */
pub const REQUEST_TIMEOUT: u64 = 2000;

/**
 * Smallest accepted heartbeat or request timeout (milliseconds). Lower configured values are raised to this.
 */
pub const MIN_TIMEOUT: u64 = 100;

/**
 * How often (milliseconds) to attempt to reconnect a transport socket.
 */
pub const CONNECT_DELAY: u64 = 1000;

/**
 * Default duration (seconds) of a search started by search-and-connect.
 */
pub const SEARCH_AND_CONNECT_DURATION: u64 = 4;

/**
 * Default duration (seconds) of a plain search.
 */
pub const SEARCH_DURATION: u64 = 10;

/**
 * Version tag sent with every request.
 */
pub const JSON_RPC_VERSION: &str = "2.0";

pub const DEFAULT_PUBLISHER_ADDRESS: &str = "tcp://192.168.100.100:9999";
pub const DEFAULT_RPC_ADDRESS: &str = "tcp://192.168.100.100:9998";
