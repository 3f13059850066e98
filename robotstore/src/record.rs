use serde::Serialize;
use serde::de::DeserializeOwned;

/// A type that can be persisted in a [`crate::Store`].
///
/// `collection_name` determines the JSONL file a record's type is appended
/// to; `id` is the primary key used for upsert/lookup/delete; `updated_at`
/// (unix millis) lets callers order records without re-parsing the payload.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn updated_at(&self) -> i64;
    fn collection_name() -> &'static str;
}
