//! Records and their storage format.

mod codec;
mod query;
mod record;

pub use codec::{CodecError, JsonCodec, RecordCodec, DEFAULT_INDENT};
pub use query::{
    apply_query, compare_values, default_filter_records, paginate_records, sort_records,
    ListOutput, ListQuery, Pagination, Sort, SortOrder, DEFAULT_PER_PAGE,
};
pub use record::{id_string, Record, ID_FIELD};
