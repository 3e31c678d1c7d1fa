pub mod detect;
pub mod id;
pub mod model;
pub mod normalize;
pub mod validate;

pub use detect::{ChangeReason, ChangeVerdict, detect_change, diff_snapshots};
pub use id::{DocumentId, OperationId, now_millis};
pub use model::*;
pub use normalize::{merge_view_state, normalize_records};
pub use validate::{IntegrityError, parse_snapshot};
