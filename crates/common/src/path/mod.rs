mod normalize;

pub use normalize::{extension, file_name, is_within, normalize_path, parent_path, PathError};
