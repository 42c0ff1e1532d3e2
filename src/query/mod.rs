// Pure builders: no I/O below this line.
pub mod condition;
pub mod lookup;
pub mod pagination;
pub mod stage;
pub mod timerange;
pub mod update;

// Execution against a collection handle.
pub mod group;
pub mod select;

pub use condition::{ConditionOp, match_regex, translate};
pub use group::{EXPECTED_GROUPS, GroupCount, group_count, group_count_pipeline};
pub use lookup::{LookupSpec, expand_all};
pub use pagination::{PageSize, Pagination};
pub use select::{Materializer, Select, SelectOutput, SelectSpec, parse_select_json, select};
pub use stage::{PipelineBuilder, Stage};
pub use timerange::{object_id_from_time, time_range};
