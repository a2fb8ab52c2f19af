/**
 * Number of frame pairs the stream buffer holds before a producer blocks.
 */
pub const FRAME_BUFFER_CAPACITY: usize = 21;

/**
 * Capacity of the command channel between a LinkHandle and the link task.
 */
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/**
 * How long (milliseconds) to wait for the user to answer a USB permission request.
 */
pub const PERMISSION_TIMEOUT: u64 = 30_000;

/**
 * How long (milliseconds) the emulated camera takes for its connect handshake.
 */
pub const EMULATOR_CONNECT_DELAY: u64 = 250;

/**
 * How often (milliseconds) the emulated camera produces a frame pair.
 */
pub const EMULATOR_FRAME_INTERVAL: u64 = 110;

pub const EMULATOR_FRAME_WIDTH: u32 = 160;
pub const EMULATOR_FRAME_HEIGHT: u32 = 120;

/**
 * Device ids reported by the emulated discovery transport.
 */
pub const FLIR_ONE_DEVICE_ID: &str = "FLIR ONE Camera";
pub const CPP_EMULATOR_DEVICE_ID: &str = "C++ Emulator";
pub const FLIR_ONE_EMULATOR_DEVICE_ID: &str = "EMULATED FLIR ONE";

/**
 * How long (milliseconds) a stopping link waits for an in-flight connect or
 * disconnect to finish before giving up on releasing the camera.
 */
pub const SHUTDOWN_DEADLINE: u64 = 10_000;

/**
 * Prefix used when naming connect/disconnect worker threads.
 */
pub const WORKER_THREAD_PREFIX: &str = "camera-link";

/**
 * How long (milliseconds) the command line app waits for the next frame pair.
 */
pub const FRAME_WAIT_DEADLINE: u64 = 5000;
