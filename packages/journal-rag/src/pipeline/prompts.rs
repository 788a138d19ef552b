//! Model prompts for classification and answer synthesis.
//!
//! Both prompts exist in Italian and English; the query's language picks
//! the template so few-shot examples match what the user wrote.

/// Language of a user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Italian,
    English,
}

const ITALIAN_MARKERS: &[&str] = &[
    "il", "lo", "la", "gli", "le", "di", "del", "della", "dei", "delle", "che", "chi", "cosa",
    "quanti", "quante", "quali", "quale", "come", "sono", "articoli", "articolo", "sul",
    "sulla", "nel", "nella", "negli", "per", "con", "ha", "hanno", "scritto", "parlano", "dice",
];

const ENGLISH_MARKERS: &[&str] = &[
    "the", "of", "what", "which", "who", "how", "many", "articles", "article", "about", "by",
    "in", "on", "did", "does", "is", "are", "was", "were", "written", "say", "says", "from",
];

/// Guess the language of a query from stop-word hits.
///
/// Ties (including queries with no markers) go to Italian, the corpus language.
pub fn detect_language(query: &str) -> Language {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let italian = words.iter().filter(|w| ITALIAN_MARKERS.contains(w)).count();
    let english = words.iter().filter(|w| ENGLISH_MARKERS.contains(w)).count();

    if english > italian {
        Language::English
    } else {
        Language::Italian
    }
}

/// Classification prompt, Italian.
pub const CLASSIFY_PROMPT_IT: &str = r#"Analizza questa domanda e determina il tipo di ricerca necessaria su un archivio di articoli giornalistici.

Domanda: {query}

Rispondi SOLO con un JSON valido in questo formato:
{
  "category": "metadata" | "semantic" | "hybrid" | "analytical",
  "confidence": numero tra 0 e 1,
  "requires_count": true/false,
  "filters": {
    "author": "nome autore o null",
    "date_range": {"start": "YYYY-MM-DD", "end": "YYYY-MM-DD"} o null,
    "categories": ["categoria1"] o null,
    "keywords": ["parola nel titolo"] o null
  },
  "semantic_query": "testo per la ricerca semantica o null",
  "reasoning": "breve spiegazione"
}

Tipi di ricerca:
- "metadata": solo filtri su metadati (autore, data, categoria), anche per conteggi
- "semantic": ricerca per significato sul contenuto degli articoli
- "hybrid": filtri sui metadati combinati con la ricerca semantica
- "analytical": analisi nel tempo, tendenze, confronti tra periodi

Esempi:
Input: "Quanti articoli di Mario Rossi nel 2023?"
Output: {"category": "metadata", "confidence": 0.95, "requires_count": true, "filters": {"author": "Mario Rossi", "date_range": {"start": "2023-01-01", "end": "2023-12-31"}, "categories": null, "keywords": null}, "semantic_query": null, "reasoning": "Filtri su autore e anno con conteggio"}

Input: "Cosa dice Giulia Verdi sull'Ucraina?"
Output: {"category": "hybrid", "confidence": 0.9, "requires_count": false, "filters": {"author": "Giulia Verdi", "date_range": null, "categories": null, "keywords": null}, "semantic_query": "Ucraina guerra", "reasoning": "Filtro autore e ricerca semantica"}

Input: "Quali articoli parlano di energia rinnovabile?"
Output: {"category": "semantic", "confidence": 0.9, "requires_count": false, "filters": {}, "semantic_query": "energia rinnovabile", "reasoning": "Ricerca semantica pura"}

Input: "Come è cambiato il dibattito sul lavoro negli ultimi anni?"
Output: {"category": "analytical", "confidence": 0.85, "requires_count": false, "filters": {}, "semantic_query": "dibattito lavoro", "reasoning": "Evoluzione di un tema nel tempo"}
"#;

/// Classification prompt, English.
pub const CLASSIFY_PROMPT_EN: &str = r#"Analyze this question and decide what kind of search it needs over an archive of journal articles.

Question: {query}

Reply ONLY with valid JSON in this format:
{
  "category": "metadata" | "semantic" | "hybrid" | "analytical",
  "confidence": number between 0 and 1,
  "requires_count": true/false,
  "filters": {
    "author": "author name or null",
    "date_range": {"start": "YYYY-MM-DD", "end": "YYYY-MM-DD"} or null,
    "categories": ["category1"] or null,
    "keywords": ["title word"] or null
  },
  "semantic_query": "text for semantic search or null",
  "reasoning": "short explanation"
}

Search types:
- "metadata": only metadata filters (author, date, category), including counts
- "semantic": meaning-based search over article content
- "hybrid": metadata filters combined with semantic search
- "analytical": change over time, trends, comparisons between periods

Examples:
Input: "How many articles did Mario Rossi write in 2023?"
Output: {"category": "metadata", "confidence": 0.95, "requires_count": true, "filters": {"author": "Mario Rossi", "date_range": {"start": "2023-01-01", "end": "2023-12-31"}, "categories": null, "keywords": null}, "semantic_query": null, "reasoning": "Author and year filters with a count"}

Input: "What does Giulia Verdi say about Ukraine?"
Output: {"category": "hybrid", "confidence": 0.9, "requires_count": false, "filters": {"author": "Giulia Verdi", "date_range": null, "categories": null, "keywords": null}, "semantic_query": "Ukraine war", "reasoning": "Author filter plus semantic search"}

Input: "Which articles discuss renewable energy?"
Output: {"category": "semantic", "confidence": 0.9, "requires_count": false, "filters": {}, "semantic_query": "renewable energy", "reasoning": "Pure semantic search"}

Input: "How has coverage of labour changed over the years?"
Output: {"category": "analytical", "confidence": 0.85, "requires_count": false, "filters": {}, "semantic_query": "labour coverage", "reasoning": "Topic evolution over time"}
"#;

/// Answer prompt, Italian.
pub const ANSWER_PROMPT_IT: &str = r#"Basandoti SOLO sugli articoli seguenti, rispondi alla domanda in modo conciso e accurato.

Articoli:
{articles}
{context}
Domanda: {query}

Regole:
- Usa solo le informazioni presenti negli articoli.
- Cita ogni affermazione con l'identificativo dell'articolo tra parentesi quadre, ad esempio [{example_id}].
- Non inventare identificativi: usa solo quelli elencati sopra.
- Se gli articoli non bastano per rispondere, dillo chiaramente.

Rispondi in italiano.
Risposta:"#;

/// Answer prompt, English.
pub const ANSWER_PROMPT_EN: &str = r#"Based ONLY on the articles below, answer the question concisely and accurately.

Articles:
{articles}
{context}
Question: {query}

Rules:
- Use only information found in the articles.
- Cite every claim with the article identifier in square brackets, for example [{example_id}].
- Do not invent identifiers: use only the ones listed above.
- If the articles are not enough to answer, say so plainly.

Answer in English.
Answer:"#;

/// Fixed reply when retrieval found nothing.
pub fn no_matches_message(language: Language) -> &'static str {
    match language {
        Language::Italian => "Nessun articolo trovato che corrisponda alla domanda.",
        Language::English => "No matching articles found for this question.",
    }
}

/// Format the classification prompt for a query.
pub fn format_classify_prompt(query: &str, language: Language) -> String {
    let template = match language {
        Language::Italian => CLASSIFY_PROMPT_IT,
        Language::English => CLASSIFY_PROMPT_EN,
    };
    template.replace("{query}", query)
}

/// Format the answer prompt.
///
/// `articles` is the pre-rendered article block; `context` is optional extra
/// lines (counts, time buckets), empty when not needed.
pub fn format_answer_prompt(
    query: &str,
    articles: &str,
    context: &str,
    example_id: &str,
    language: Language,
) -> String {
    let template = match language {
        Language::Italian => ANSWER_PROMPT_IT,
        Language::English => ANSWER_PROMPT_EN,
    };
    template
        .replace("{articles}", articles)
        .replace("{context}", context)
        .replace("{example_id}", example_id)
        .replace("{query}", query)
}
