// Constants for the trace engine

/// Function whose first entry starts the program
pub const DEFAULT_ENTRY_POINT: &str = "main";

/// Frame id stamped on steps emitted while no frame was ever opened
pub const GLOBAL_FRAME_ID: &str = "global";

/// Return type reported for functions that never emitted a `return` event
pub const RETURN_TYPE_PLACEHOLDER: &str = "unknown";

/// Scope reported for symbols declared before the entry point runs
pub const GLOBAL_SCOPE: &str = "global";
