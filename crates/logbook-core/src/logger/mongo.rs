//! MongoDB backend: one document per config, message or metadata record.

use mongodb::bson::{self, Document};
use mongodb::sync::{Client, Collection};
use tracing::{debug, info};

use crate::config::MongoConfig;
use crate::error::Result;
use crate::logger::{KeyFilter, Logger};
use crate::models::{LogRecord, LogType};

const BACKEND: &str = "mongo";

pub struct MongoLogger {
    collection: Collection<Document>,
    filter: KeyFilter,
}

impl MongoLogger {
    /// The client connects lazily; the first insert opens the connection.
    pub fn new(config: &MongoConfig) -> Result<Self> {
        let client = Client::with_uri_str(config.uri())?;
        let collection = client
            .database(&config.db)
            .collection::<Document>(&config.collection);

        info!(
            uri = %config.uri(),
            db = %config.db,
            collection = %config.collection,
            "mongo logger ready"
        );
        Ok(Self {
            collection,
            filter: KeyFilter::new(&config.keys),
        })
    }
}

/// Metrics go to the metric backends, not the document store.
fn is_stored(log_type: Option<LogType>) -> bool {
    matches!(
        log_type,
        Some(LogType::Config | LogType::Message | LogType::Metadata)
    )
}

fn to_document(log: &LogRecord) -> Result<Document> {
    Ok(bson::to_document(log)?)
}

impl Logger for MongoLogger {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn write_log(&mut self, log: &LogRecord) -> Result<()> {
        let log_type = LogType::of(log);
        if !is_stored(log_type) {
            debug!(log_type = ?log_type, "record type not stored in mongo");
            return Ok(());
        }
        let document = to_document(&self.filter.prepare_log(log))?;
        self.collection.insert_one(document).run()?;
        Ok(())
    }
}
