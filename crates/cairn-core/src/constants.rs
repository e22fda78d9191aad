/// Path prefix under which worker nodes (and this master) expose the file API.
pub const DEFAULT_API_PREFIX: &str = "/jifa-api";

/// Content type used for every file part sent to a worker.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Upper bound for `page_size` on paged listings.
pub const MAX_PAGE_SIZE: u32 = 100;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
