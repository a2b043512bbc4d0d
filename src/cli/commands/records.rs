//! Record subcommands operating on a named resource.

use clap::Args;
use serde_json::{json, Map, Value};

use crate::app::App;
use crate::cli::{CliError, InputSource, OutputSink, Result};
use crate::records::{ListQuery, Pagination, Sort, SortOrder, DEFAULT_PER_PAGE};

// =============================================================================
// List
// =============================================================================

/// Arguments for the list command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Resource name.
    pub resource: String,

    /// 1-based page to return. All records are returned when omitted.
    #[arg(long)]
    pub page: Option<usize>,

    /// Records per page.
    #[arg(long = "per-page", default_value_t = DEFAULT_PER_PAGE)]
    pub per_page: usize,

    /// Field to sort by.
    #[arg(long)]
    pub sort: Option<String>,

    /// Sort in descending order.
    #[arg(long)]
    pub desc: bool,

    /// Filter as a JSON object, e.g. '{"q": "ada", "age_gte": 30}'.
    #[arg(long)]
    pub filter: Option<String>,

    /// Include file contents for raw resources.
    #[arg(long = "load-data")]
    pub load_data: bool,

    #[command(flatten)]
    pub output: OutputSink,
}

impl ListArgs {
    fn to_query(&self) -> Result<ListQuery> {
        let filter = match &self.filter {
            Some(text) => parse_filter(text)?,
            None => Map::new(),
        };
        Ok(ListQuery {
            pagination: self.page.map(|page| Pagination {
                page,
                per_page: self.per_page,
            }),
            sort: self.sort.as_ref().map(|field| Sort {
                field: field.clone(),
                order: if self.desc {
                    SortOrder::Desc
                } else {
                    SortOrder::Asc
                },
            }),
            filter,
            load_data: self.load_data,
        })
    }

    pub async fn run(self, app: &App) -> Result<()> {
        let query = self.to_query()?;
        let collection = app.resource(&self.resource)?;
        let listed = collection.list(&query).await?;
        self.output
            .write(&json!({ "data": listed.records, "total": listed.total }))
            .await?;
        Ok(())
    }
}

fn parse_filter(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CliError::Other("--filter must be a JSON object".to_string())),
        Err(e) => Err(CliError::Other(format!("invalid --filter: {}", e))),
    }
}

// =============================================================================
// Get
// =============================================================================

/// Arguments for the get command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Resource name.
    pub resource: String,

    /// Record ids. With more than one id, the records found are returned as
    /// an array.
    #[arg(required = true)]
    pub ids: Vec<String>,

    #[command(flatten)]
    pub output: OutputSink,
}

impl GetArgs {
    pub async fn run(self, app: &App) -> Result<()> {
        let collection = app.resource(&self.resource)?;
        if let [id] = self.ids.as_slice() {
            let record = collection
                .get_one(id)
                .await?
                .ok_or_else(|| CliError::Other(format!("record {} not found", id)))?;
            self.output.write(&record).await?;
        } else {
            let records = collection.get_many(&self.ids).await?;
            self.output.write(&records).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Create / Update
// =============================================================================

/// Arguments for the create command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Resource name.
    pub resource: String,

    /// Record data as a JSON object. Read from --input-file or stdin if omitted.
    pub data: Option<String>,

    #[command(flatten)]
    pub input: InputSource,

    #[command(flatten)]
    pub output: OutputSink,
}

impl CreateArgs {
    pub async fn run(self, app: &App) -> Result<()> {
        let collection = app.resource(&self.resource)?;
        let data = self.input.read_record(self.data.as_deref()).await?;
        let created = collection.create(data).await?;
        self.output.write(&created).await?;
        Ok(())
    }
}

/// Arguments for the update command.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Resource name.
    pub resource: String,

    /// Id of the record to update.
    pub id: String,

    /// Fields to merge into the record, as a JSON object. Read from
    /// --input-file or stdin if omitted.
    pub data: Option<String>,

    #[command(flatten)]
    pub input: InputSource,

    #[command(flatten)]
    pub output: OutputSink,
}

impl UpdateArgs {
    pub async fn run(self, app: &App) -> Result<()> {
        let collection = app.resource(&self.resource)?;
        let data = self.input.read_record(self.data.as_deref()).await?;
        let updated = collection.update(&self.id, data).await?;
        self.output.write(&updated).await?;
        Ok(())
    }
}

// =============================================================================
// Delete
// =============================================================================

/// Arguments for the delete command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Resource name.
    pub resource: String,

    /// Id of the record to delete.
    pub id: String,

    #[command(flatten)]
    pub output: OutputSink,
}

impl DeleteArgs {
    pub async fn run(self, app: &App) -> Result<()> {
        let collection = app.resource(&self.resource)?;
        let deleted = collection.delete(&self.id).await?;
        self.output.write(&deleted).await?;
        Ok(())
    }
}

/// Arguments for the delete-many command.
#[derive(Args, Debug)]
pub struct DeleteManyArgs {
    /// Resource name.
    pub resource: String,

    /// Ids of the records to delete.
    #[arg(required = true)]
    pub ids: Vec<String>,

    #[command(flatten)]
    pub output: OutputSink,
}

impl DeleteManyArgs {
    pub async fn run(self, app: &App) -> Result<()> {
        let collection = app.resource(&self.resource)?;
        let deleted = collection.delete_many(&self.ids).await?;
        self.output.write(&deleted).await?;
        Ok(())
    }
}
