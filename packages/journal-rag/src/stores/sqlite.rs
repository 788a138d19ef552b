//! SQLite article store.
//!
//! A file-based backend for local archives. Articles live in one table with
//! indexes on author and publication date; categories are a join table so
//! category filters stay indexed. Embeddings are little-endian f32 BLOBs.
//!
//! Author, title and category are also stored as [`match_key`] columns,
//! folded in Rust at write time, so every [`ArticleFilter`] field is decided
//! in SQL with the same case folding as [`ArticleFilter::matches`].

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::debug;

use crate::error::{RagError, Result};
use crate::traits::store::{ArticleStore, SortOrder};
use crate::types::{
    article::{Article, ArticleMetadata, ArticleRef, CorpusStatistics, EmbeddingEntry},
    config::{match_key, ArticleFilter, AuthorMatch},
};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Ids per `IN (...)` list when loading categories.
const ID_CHUNK: usize = 500;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        title_key TEXT NOT NULL DEFAULT '',
        author TEXT NOT NULL DEFAULT '',
        author_key TEXT NOT NULL DEFAULT '',
        publication_date TEXT,
        translator TEXT,
        source TEXT,
        number INTEGER,
        url TEXT,
        content TEXT NOT NULL,
        embedding BLOB
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_articles_author ON articles(author)",
    "CREATE INDEX IF NOT EXISTS idx_articles_author_key ON articles(author_key)",
    "CREATE INDEX IF NOT EXISTS idx_articles_publication_date ON articles(publication_date)",
    r#"
    CREATE TABLE IF NOT EXISTS article_categories (
        article_id TEXT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
        category TEXT NOT NULL,
        category_key TEXT NOT NULL,
        PRIMARY KEY (article_id, category)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_article_categories_key ON article_categories(category_key, article_id)",
];

/// SQLite-based article store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and migrate) a database.
    ///
    /// # Example URLs
    /// - `sqlite://./journal.db` - File-based database
    /// - `sqlite://./journal.db?mode=rwc` - Create if not exists
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, 5).await
    }

    /// Create an in-memory store (for testing).
    ///
    /// Uses a single connection: every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect_with("sqlite::memory:", 1).await
    }

    async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(RagError::store)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(RagError::store)?;
        }
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace an article together with its categories.
    ///
    /// Runs in one transaction, so readers never see a partial article.
    pub async fn upsert_article(&self, article: &Article) -> Result<()> {
        let meta = &article.metadata;
        let mut tx = self.pool.begin().await.map_err(RagError::store)?;

        sqlx::query(
            r#"
            INSERT INTO articles
                (id, title, title_key, author, author_key, publication_date, translator, source, number, url, content, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                title_key = excluded.title_key,
                author = excluded.author,
                author_key = excluded.author_key,
                publication_date = excluded.publication_date,
                translator = excluded.translator,
                source = excluded.source,
                number = excluded.number,
                url = excluded.url,
                content = excluded.content,
                embedding = excluded.embedding
            "#,
        )
        .bind(&article.id)
        .bind(&meta.title)
        .bind(match_key(&meta.title))
        .bind(&meta.author)
        .bind(match_key(&meta.author))
        .bind(meta.publication_date.map(format_date))
        .bind(&meta.translator)
        .bind(&meta.source)
        .bind(meta.number)
        .bind(&meta.url)
        .bind(&article.content)
        .bind(article.embedding.as_deref().map(encode_embedding))
        .execute(&mut *tx)
        .await
        .map_err(RagError::store)?;

        sqlx::query("DELETE FROM article_categories WHERE article_id = ?")
            .bind(&article.id)
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;

        for category in &meta.categories {
            sqlx::query(
                "INSERT INTO article_categories (article_id, category, category_key) VALUES (?, ?, ?)",
            )
            .bind(&article.id)
            .bind(category)
            .bind(match_key(category))
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;
        }

        tx.commit().await.map_err(RagError::store)?;
        debug!(article_id = %article.id, "Article stored");
        Ok(())
    }

    /// Store several articles, one transaction each.
    pub async fn upsert_articles(&self, articles: &[Article]) -> Result<()> {
        for article in articles {
            self.upsert_article(article).await?;
        }
        Ok(())
    }

    async fn load_categories(&self, rows: &[ArticleRow]) -> Result<HashMap<String, Vec<String>>> {
        let mut categories: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in rows.chunks(ID_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT article_id, category FROM article_categories WHERE article_id IN (");
            let mut ids = qb.separated(", ");
            for row in chunk {
                ids.push_bind(row.id.clone());
            }
            ids.push_unseparated(")");

            let pairs: Vec<(String, String)> = qb
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .map_err(RagError::store)?;
            for (id, category) in pairs {
                categories.entry(id).or_default().push(category);
            }
        }
        Ok(categories)
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct ArticleRow {
    id: String,
    title: String,
    author: String,
    publication_date: Option<String>,
    translator: Option<String>,
    source: Option<String>,
    number: Option<i64>,
    url: Option<String>,
    content: String,
    embedding: Option<Vec<u8>>,
}

impl ArticleRow {
    fn into_article(self, categories: Vec<String>) -> Result<Article> {
        let publication_date = self
            .publication_date
            .as_deref()
            .map(|d| parse_date(&self.id, d))
            .transpose()?;
        let embedding = self
            .embedding
            .as_deref()
            .map(|bytes| decode_embedding(&self.id, bytes))
            .transpose()?;

        Ok(Article {
            metadata: ArticleMetadata {
                title: self.title,
                author: self.author,
                publication_date,
                categories: categories.into_iter().collect(),
                translator: self.translator,
                source: self.source,
                number: self.number,
                url: self.url,
            },
            id: self.id,
            content: self.content,
            embedding,
        })
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(article_id: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
        RagError::store(format!("invalid publication_date for {article_id}: {e}"))
    })
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(article_id: &str, bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::store(format!(
            "embedding blob for {article_id} has {} bytes, not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ArticleFilter) {
    if let Some(ids) = &filter.ids {
        if ids.is_empty() {
            qb.push(" AND 0");
        } else {
            qb.push(" AND a.id IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(id.clone());
            }
            list.push_unseparated(")");
        }
    }

    if let Some(author) = &filter.author {
        match filter.author_match {
            AuthorMatch::Exact => {
                qb.push(" AND a.author = ").push_bind(author.clone());
            }
            AuthorMatch::CaseInsensitive => {
                qb.push(" AND a.author_key = ").push_bind(match_key(author));
            }
            AuthorMatch::Contains => {
                qb.push(" AND instr(a.author_key, ")
                    .push_bind(match_key(author))
                    .push(") > 0");
            }
        }
    }

    // NULL comparisons are false, so undated articles drop out here.
    if let Some(range) = filter.date_range.filter(|r| !r.is_unbounded()) {
        if let Some(from) = range.from {
            qb.push(" AND a.publication_date >= ").push_bind(format_date(from));
        }
        if let Some(to) = range.to {
            qb.push(" AND a.publication_date <= ").push_bind(format_date(to));
        }
    }

    if let Some(categories) = filter.categories.as_ref().filter(|c| !c.is_empty()) {
        let keys: BTreeSet<String> = categories.iter().map(|c| match_key(c)).collect();
        qb.push(
            " AND EXISTS (SELECT 1 FROM article_categories c WHERE c.article_id = a.id AND c.category_key IN (",
        );
        let mut list = qb.separated(", ");
        for key in keys {
            list.push_bind(key);
        }
        list.push_unseparated("))");
    }

    if let Some(keywords) = filter.keywords.as_ref().filter(|k| !k.is_empty()) {
        qb.push(" AND (");
        for (i, keyword) in keywords.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("instr(a.title_key, ")
                .push_bind(match_key(keyword))
                .push(") > 0");
        }
        qb.push(")");
    }
}

fn push_order_and_limit(qb: &mut QueryBuilder<'_, Sqlite>, order: SortOrder, limit: Option<usize>) {
    qb.push(match order {
        SortOrder::DateDesc => " ORDER BY a.publication_date IS NULL, a.publication_date DESC, a.id ASC",
        SortOrder::DateAsc => " ORDER BY a.publication_date IS NULL, a.publication_date ASC, a.id ASC",
    });
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn find(
        &self,
        filter: &ArticleFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Article>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, title, author, publication_date, translator, source, number, url, content, embedding \
             FROM articles a WHERE 1 = 1",
        );
        push_conditions(&mut qb, filter);
        push_order_and_limit(&mut qb, order, limit);

        let rows: Vec<ArticleRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::store)?;

        let mut categories = self.load_categories(&rows).await?;
        rows.into_iter()
            .map(|row| {
                let cats = categories.remove(&row.id).unwrap_or_default();
                row.into_article(cats)
            })
            .collect()
    }

    async fn find_refs(
        &self,
        filter: &ArticleFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ArticleRef>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, title, publication_date FROM articles a WHERE 1 = 1");
        push_conditions(&mut qb, filter);
        push_order_and_limit(&mut qb, order, limit);

        let rows: Vec<(String, String, Option<String>)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::store)?;

        rows.into_iter()
            .map(|(id, title, date)| {
                Ok(ArticleRef {
                    publication_date: date.as_deref().map(|d| parse_date(&id, d)).transpose()?,
                    id,
                    title,
                })
            })
            .collect()
    }

    async fn count(&self, filter: &ArticleFilter) -> Result<u64> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM articles a WHERE 1 = 1");
        push_conditions(&mut qb, filter);
        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::store)?;
        Ok(count.max(0) as u64)
    }

    async fn all_embeddings(&self) -> Result<Vec<EmbeddingEntry>> {
        let rows: Vec<(String, Option<String>, Vec<u8>)> = sqlx::query_as(
            "SELECT id, publication_date, embedding FROM articles WHERE embedding IS NOT NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::store)?;

        rows.into_iter()
            .map(|(id, date, bytes)| {
                Ok(EmbeddingEntry {
                    publication_date: date.as_deref().map(|d| parse_date(&id, d)).transpose()?,
                    embedding: decode_embedding(&id, &bytes)?,
                    article_id: id,
                })
            })
            .collect()
    }

    async fn get_date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let (min, max): (Option<String>, Option<String>) = sqlx::query_as(
            "SELECT MIN(publication_date), MAX(publication_date) FROM articles WHERE publication_date IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(RagError::store)?;

        match (min, max) {
            (Some(min), Some(max)) => Ok(Some((parse_date("min", &min)?, parse_date("max", &max)?))),
            _ => Ok(None),
        }
    }

    async fn get_articles(&self, ids: &[String]) -> Result<Vec<Article>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = ArticleFilter::new().with_ids(ids.iter().cloned());
        let mut found: HashMap<String, Article> = self
            .find(&filter, SortOrder::DateDesc, None)
            .await?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn authors(&self) -> Result<BTreeSet<String>> {
        let authors: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT author FROM articles WHERE author != ''")
                .fetch_all(&self.pool)
                .await
                .map_err(RagError::store)?;
        Ok(authors.into_iter().collect())
    }

    async fn statistics(&self) -> Result<CorpusStatistics> {
        let (total, authors): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(DISTINCT NULLIF(author, '')) FROM articles",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(RagError::store)?;
        let range = self.get_date_range().await?;

        Ok(CorpusStatistics {
            total_articles: total.max(0) as u64,
            unique_authors: authors.max(0) as u64,
            oldest: range.map(|(lo, _)| lo),
            newest: range.map(|(_, hi)| hi),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_corpus;
    use crate::types::query::DateRange;

    async fn test_store() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_articles(&sample_corpus()).await.unwrap();
        store
    }

    fn by_author(author: &str, mode: AuthorMatch) -> ArticleFilter {
        ArticleFilter {
            author: Some(author.into()),
            author_match: mode,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_article_round_trip() {
        let store = test_store().await;
        let article = store
            .get_article("bianchi-2023-rinnovabili")
            .await
            .unwrap()
            .unwrap();
        let expected = sample_corpus()
            .into_iter()
            .find(|a| a.id == "bianchi-2023-rinnovabili")
            .unwrap();
        assert_eq!(article, expected);
    }

    #[tokio::test]
    async fn test_author_count_and_order() {
        let store = test_store().await;
        let filter = by_author("mario rossi", AuthorMatch::CaseInsensitive);
        assert_eq!(store.count(&filter).await.unwrap(), 3);

        let found = store.find(&filter, SortOrder::DateDesc, Some(2)).await.unwrap();
        let ids: Vec<_> = found.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["rossi-2023-ucraina", "rossi-2022-lavoro"]);

        let exact = by_author("mario rossi", AuthorMatch::Exact);
        assert_eq!(store.count(&exact).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_category_and_date_filters() {
        let store = test_store().await;
        let filter = ArticleFilter {
            categories: Some(["ENERGIA".to_string()].into()),
            ..Default::default()
        };
        assert_eq!(store.count(&filter).await.unwrap(), 2);

        let in_2023 = filter.with_date_range(DateRange::year(2023).unwrap());
        let found = store.find(&in_2023, SortOrder::DateAsc, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "bianchi-2023-rinnovabili");
    }

    #[tokio::test]
    async fn test_filters_fold_case_in_sql() {
        let store = test_store().await;

        let society = ArticleFilter {
            categories: Some(["SOCIETÀ".to_string()].into()),
            ..Default::default()
        };
        assert_eq!(store.count(&society).await.unwrap(), 1);

        assert_eq!(store.count(&by_author("ROSS", AuthorMatch::Contains)).await.unwrap(), 3);

        let war = ArticleFilter {
            keywords: Some(vec!["GUERRA".into()]),
            ..Default::default()
        };
        let refs = store.find_refs(&war, SortOrder::DateDesc, None).await.unwrap();
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rossi-2023-ucraina", "verdi-2022-ucraina"]);
        assert_eq!(store.count(&war).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_refs_matches_find() {
        let store = test_store().await;
        let filter = by_author("Mario Rossi", AuthorMatch::CaseInsensitive);

        let refs = store.find_refs(&filter, SortOrder::DateAsc, Some(2)).await.unwrap();
        let full = store.find(&filter, SortOrder::DateAsc, Some(2)).await.unwrap();
        let expected: Vec<ArticleRef> = full.iter().map(ArticleRef::from).collect();
        assert_eq!(refs, expected);
        assert_eq!(refs[0].title, "Il prezzo dell'energia");
    }

    #[tokio::test]
    async fn test_author_lookup_uses_index() {
        let store = test_store().await;
        let filter = by_author("mario rossi", AuthorMatch::CaseInsensitive);

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("EXPLAIN QUERY PLAN SELECT a.id FROM articles a WHERE 1 = 1");
        push_conditions(&mut qb, &filter);
        let plan: Vec<(i64, i64, i64, String)> =
            qb.build_query_as().fetch_all(store.pool()).await.unwrap();

        assert!(
            plan.iter().any(|(_, _, _, detail)| detail.contains("idx_articles_author_key")),
            "plan: {plan:?}"
        );
    }

    #[tokio::test]
    async fn test_authors() {
        let store = test_store().await;
        let authors = store.authors().await.unwrap();
        assert_eq!(authors.len(), 4);
        assert!(authors.contains("Giulia Verdi"));
    }

    #[tokio::test]
    async fn test_undated_sorts_last() {
        let store = test_store().await;
        let all = store
            .find(&ArticleFilter::new(), SortOrder::DateAsc, None)
            .await
            .unwrap();
        assert_eq!(all.first().unwrap().id, "rossi-2021-energia");
        assert_eq!(all.last().unwrap().id, "neri-cultura");
    }

    #[tokio::test]
    async fn test_upsert_replaces_categories() {
        let store = test_store().await;
        let mut article = store.get_article("neri-cultura").await.unwrap().unwrap();
        article.metadata.categories = ["teatro".to_string()].into();
        store.upsert_article(&article).await.unwrap();

        let reloaded = store.get_article("neri-cultura").await.unwrap().unwrap();
        assert_eq!(reloaded.metadata.categories, ["teatro".to_string()].into());
        assert_eq!(store.statistics().await.unwrap().total_articles, 6);
    }

    #[tokio::test]
    async fn test_embeddings_and_statistics() {
        let store = test_store().await;
        let entries = store.all_embeddings().await.unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0].article_id, "bianchi-2023-rinnovabili");
        assert_eq!(entries[0].embedding, vec![0.95, 0.0, 0.1, 0.0]);

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.unique_authors, 4);
        assert_eq!(stats.oldest, NaiveDate::from_ymd_opt(2021, 3, 15));
        assert_eq!(stats.newest, NaiveDate::from_ymd_opt(2023, 9, 12));
    }

    #[tokio::test]
    async fn test_get_articles_keeps_request_order() {
        let store = test_store().await;
        let ids = vec![
            "neri-cultura".to_string(),
            "missing".to_string(),
            "rossi-2021-energia".to_string(),
        ];
        let found = store.get_articles(&ids).await.unwrap();
        let got: Vec<_> = found.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(got, vec!["neri-cultura", "rossi-2021-energia"]);
    }

    #[test]
    fn test_embedding_blob_encoding() {
        let blob = encode_embedding(&[0.5, -1.0]);
        assert_eq!(blob.len(), 8);
        assert_eq!(decode_embedding("x", &blob).unwrap(), vec![0.5, -1.0]);
        assert!(decode_embedding("x", &blob[..7]).is_err());
    }
}
