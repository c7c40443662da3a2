//! Tantivy Index Engine
//!
//! # Schema
//!
//! Reserved fields, present on every document:
//!
//! - `_type` - root entity type (keyword)
//! - `_id` - entity id as JSON (stored)
//! - `_key` - `type#<id as JSON>`, the upsert/delete key (keyword). The JSON
//!   form keeps `7` apart from `"7"` and `[1,2]` apart from `"1,2"`.
//!
//! plus the layout's keyword fields (containment id fields such as
//! `sorcerers.id`) and text fields (tokenized, searchable). All of them are
//! stored so documents can be read back.
//!
//! # Transactions
//!
//! One `IndexWriter` (single indexing thread) behind a mutex. A transaction
//! holds the writer for its whole life; dropping it uncommitted rolls back.
//! The reader is reloaded manually after each commit.

use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    directory::MmapDirectory,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::{
        Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, TEXT,
    },
    DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term,
};
use tracing::{debug, info, warn};

use crate::domain::{ContainmentIndex, EntityDocument, EntityId, IndexEngine, IndexTransaction};
use crate::error::{Result, SyncError};

pub const FIELD_TYPE: &str = "_type";
pub const FIELD_ID: &str = "_id";
pub const FIELD_KEY: &str = "_key";

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Which document fields the index knows about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexLayout {
    keyword_fields: BTreeSet<String>,
    text_fields: BTreeSet<String>,
}

impl IndexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout with every containment id field as a keyword field
    pub fn for_containment(containment: &ContainmentIndex) -> Self {
        containment
            .id_fields()
            .into_iter()
            .fold(Self::new(), |layout, field| layout.keyword_field(field))
    }

    /// Exact-match field (ids, codes)
    pub fn keyword_field(mut self, name: impl Into<String>) -> Self {
        self.keyword_fields.insert(name.into());
        self
    }

    /// Tokenized full-text field
    pub fn text_field(mut self, name: impl Into<String>) -> Self {
        self.text_fields.insert(name.into());
        self
    }

    pub fn keyword_fields(&self) -> impl Iterator<Item = &str> {
        self.keyword_fields.iter().map(String::as_str)
    }

    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        self.text_fields.iter().map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        let mut physical = HashMap::new();
        for name in self.keyword_fields.iter().chain(&self.text_fields) {
            if name.is_empty() || physical_name(name).starts_with('_') {
                return Err(SyncError::invalid_model(format!(
                    "Index field '{}' is empty or uses the reserved '_' prefix",
                    name
                )));
            }
            if self.keyword_fields.contains(name) && self.text_fields.contains(name) {
                return Err(SyncError::invalid_model(format!(
                    "Index field '{}' declared as both keyword and text",
                    name
                )));
            }
            if let Some(previous) = physical.insert(physical_name(name), name) {
                return Err(SyncError::invalid_model(format!(
                    "Index fields '{}' and '{}' collide",
                    previous, name
                )));
            }
        }
        Ok(())
    }
}

/// Tantivy field name for a dotted document field (`sorcerers.id` -> `sorcerers_id`)
fn physical_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn document_key(entity_type: &str, id: &EntityId) -> Result<String> {
    Ok(format!("{}#{}", entity_type, serde_json::to_string(id)?))
}

fn keyword_options() -> TextOptions {
    TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("raw")
                .set_index_option(IndexRecordOption::Basic),
        )
        .set_stored()
}

#[derive(Debug, Clone)]
struct IndexFields {
    entity_type: Field,
    id: Field,
    key: Field,
    keyword: HashMap<String, Field>,
    text: HashMap<String, Field>,
}

impl IndexFields {
    fn by_name(&self, name: &str) -> Option<Field> {
        self.keyword
            .get(name)
            .or_else(|| self.text.get(name))
            .copied()
    }
}

fn build_schema(layout: &IndexLayout) -> (Schema, IndexFields) {
    let mut builder = Schema::builder();
    let entity_type = builder.add_text_field(FIELD_TYPE, keyword_options());
    let id = builder.add_text_field(FIELD_ID, TextOptions::default().set_stored());
    let key = builder.add_text_field(FIELD_KEY, keyword_options());

    let keyword = layout
        .keyword_fields()
        .map(|name| {
            let field = builder.add_text_field(&physical_name(name), keyword_options());
            (name.to_string(), field)
        })
        .collect();
    let text = layout
        .text_fields()
        .map(|name| {
            let field = builder.add_text_field(&physical_name(name), TEXT | STORED);
            (name.to_string(), field)
        })
        .collect();

    (
        builder.build(),
        IndexFields {
            entity_type,
            id,
            key,
            keyword,
            text,
        },
    )
}

/// `IndexEngine` on top of a tantivy index
pub struct TantivyIndexEngine {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: IndexFields,
    layout: IndexLayout,
}

impl TantivyIndexEngine {
    /// Open the index in `index_dir`, creating it (and the directory) if needed.
    ///
    /// Fails if an existing index was created with a different layout.
    pub fn open_in_dir(index_dir: &Path, layout: IndexLayout) -> Result<Self> {
        layout.validate()?;
        std::fs::create_dir_all(index_dir)?;
        let (schema, fields) = build_schema(&layout);
        let directory = MmapDirectory::open(index_dir).map_err(|err| {
            SyncError::index(format!("Failed to open index dir {}", index_dir.display()))
                .with_source(err)
        })?;
        let index = Index::open_or_create(directory, schema)?;
        info!(path = %index_dir.display(), "Tantivy index opened");
        Self::with_index(index, fields, layout)
    }

    /// RAM-only index (for testing)
    pub fn in_memory(layout: IndexLayout) -> Result<Self> {
        layout.validate()?;
        let (schema, fields) = build_schema(&layout);
        Self::with_index(Index::create_in_ram(schema), fields, layout)
    }

    fn with_index(index: Index, fields: IndexFields, layout: IndexLayout) -> Result<Self> {
        let writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
            layout,
        })
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    /// Committed document count
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Read a committed document back
    pub fn document(&self, entity_type: &str, id: &EntityId) -> Result<Option<EntityDocument>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.key, &document_key(entity_type, id)?),
            IndexRecordOption::Basic,
        );
        let hits = searcher.search(&query, &TopDocs::with_limit(1))?;
        match hits.first() {
            Some((_, address)) => self.load(&searcher, *address).map(Some),
            None => Ok(None),
        }
    }

    /// Full-text search over the text fields, restricted to one root type
    pub fn search(&self, root_type: &str, query: &str, limit: usize) -> Result<Vec<EntityId>> {
        if limit == 0 || self.fields.text.is_empty() {
            return Ok(Vec::new());
        }
        let parser = QueryParser::for_index(&self.index, self.fields.text.values().copied().collect());
        let parsed = parser.parse_query(query).map_err(|err| {
            SyncError::index(format!("Invalid query '{}'", query)).with_source(err)
        })?;
        let query = BooleanQuery::new(vec![
            (Occur::Must, self.type_query(root_type)),
            (Occur::Must, parsed),
        ]);
        self.collect_ids(&query, 0, limit)
    }

    fn type_query(&self, root_type: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(self.fields.entity_type, root_type),
            IndexRecordOption::Basic,
        ))
    }

    fn collect_ids(&self, query: &dyn Query, offset: usize, limit: usize) -> Result<Vec<EntityId>> {
        let searcher = self.reader.searcher();
        let hits = searcher.search(query, &TopDocs::with_limit(limit).and_offset(offset))?;
        hits.into_iter()
            .map(|(_, address)| {
                let doc: TantivyDocument = searcher.doc(address)?;
                self.stored_id(&doc)
            })
            .collect()
    }

    fn stored_id(&self, doc: &TantivyDocument) -> Result<EntityId> {
        let raw = doc
            .get_first(self.fields.id)
            .and_then(|v| v.as_str())
            .ok_or_else(|| SyncError::index("Document without stored id"))?;
        Ok(serde_json::from_str(raw)?)
    }

    fn load(&self, searcher: &Searcher, address: DocAddress) -> Result<EntityDocument> {
        let doc: TantivyDocument = searcher.doc(address)?;
        let entity_type = doc
            .get_first(self.fields.entity_type)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let mut fields = BTreeMap::new();
        for (name, field) in self.fields.keyword.iter().chain(&self.fields.text) {
            let values: Vec<String> = doc
                .get_all(*field)
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect();
            if !values.is_empty() {
                fields.insert(name.clone(), values);
            }
        }
        Ok(EntityDocument {
            entity_type,
            id: self.stored_id(&doc)?,
            fields,
        })
    }

    fn to_tantivy(&self, document: &EntityDocument) -> Result<TantivyDocument> {
        let mut doc = TantivyDocument::new();
        doc.add_text(self.fields.entity_type, &document.entity_type);
        doc.add_text(self.fields.id, serde_json::to_string(&document.id)?);
        doc.add_text(
            self.fields.key,
            document_key(&document.entity_type, &document.id)?,
        );
        for (name, values) in &document.fields {
            match self.fields.by_name(name) {
                Some(field) => {
                    for value in values {
                        doc.add_text(field, value);
                    }
                }
                None => debug!(field = %name, "Field not in index layout, skipped"),
            }
        }
        Ok(doc)
    }

    fn key_term(&self, entity_type: &str, id: &EntityId) -> Result<Term> {
        Ok(Term::from_field_text(
            self.fields.key,
            &document_key(entity_type, id)?,
        ))
    }
}

impl IndexEngine for TantivyIndexEngine {
    fn begin(&self) -> Result<Box<dyn IndexTransaction + '_>> {
        Ok(Box::new(TantivyTransaction {
            engine: self,
            writer: self.writer.lock(),
            finished: false,
        }))
    }

    fn find_ids(
        &self,
        root_type: &str,
        field: &str,
        value: &str,
        first_result: usize,
        max_results: usize,
    ) -> Result<Vec<EntityId>> {
        let Some(term_field) = self.fields.keyword.get(field).copied() else {
            return Err(SyncError::invalid_model(format!(
                "'{}' is not a keyword field of the index layout",
                field
            )));
        };
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let query = BooleanQuery::new(vec![
            (Occur::Must, self.type_query(root_type)),
            (
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(term_field, value),
                    IndexRecordOption::Basic,
                )) as Box<dyn Query>,
            ),
        ]);
        self.collect_ids(&query, first_result, max_results)
    }
}

struct TantivyTransaction<'a> {
    engine: &'a TantivyIndexEngine,
    writer: MutexGuard<'a, IndexWriter>,
    finished: bool,
}

impl IndexTransaction for TantivyTransaction<'_> {
    fn add(&mut self, document: EntityDocument) -> Result<()> {
        let doc = self.engine.to_tantivy(&document)?;
        self.writer.add_document(doc)?;
        Ok(())
    }

    fn update(&mut self, document: EntityDocument) -> Result<()> {
        let doc = self.engine.to_tantivy(&document)?;
        self.writer
            .delete_term(self.engine.key_term(&document.entity_type, &document.id)?);
        self.writer.add_document(doc)?;
        Ok(())
    }

    fn delete(&mut self, entity_type: &str, id: &EntityId) -> Result<()> {
        self.writer.delete_term(self.engine.key_term(entity_type, id)?);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.writer.commit()?;
        self.finished = true;
        self.engine.reader.reload()?;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.writer.rollback()?;
        Ok(())
    }
}

impl Drop for TantivyTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.writer.rollback() {
                warn!(error = %err, "Rollback of abandoned index transaction failed");
            }
        }
    }
}
