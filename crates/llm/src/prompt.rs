//! Prompt templates
//!
//! Builders for the prompts the analyzer and the attribution enhancer send
//! through the language model adapter. Kept in one place so the wording is
//! testable without network access.

use ragpipe_core::QueryType;

/// Per-language few-shot examples for query expansion
struct LanguageExamples {
    keyword: &'static str,
    natural: &'static str,
    expanded: [&'static str; 3],
    rewritten: &'static str,
}

fn examples_for(language: &str) -> Option<LanguageExamples> {
    match language {
        "en" => Some(LanguageExamples {
            keyword: "car price new york",
            natural: "How much do cars cost in New York?",
            expanded: [
                "car price new york automobile cost",
                "used car prices new york city",
                "vehicle purchase cost new york area",
            ],
            rewritten: "New and used car sales prices in New York City",
        }),
        "tr" => Some(LanguageExamples {
            keyword: "araba fiyat istanbul",
            natural: "İstanbul'da araba fiyatları ne kadar?",
            expanded: [
                "araba fiyat istanbul otomobil ücret",
                "ikinci el araba fiyatları istanbul",
                "araç satın alma maliyeti istanbul şehri",
            ],
            rewritten: "İstanbul'da yeni ve ikinci el araç satış fiyatları",
        }),
        _ => None,
    }
}

/// Prompt asking the model to classify a query's type.
pub fn query_analysis(query: &str) -> String {
    format!(
        r#"Analyze the following search query and determine its type:

Query: "{query}"

Determine if this is a:
1. Keyword query (just some terms without proper grammar)
2. Natural language query (proper grammatical question)
3. Hybrid query (mix of keywords and natural language)

Return your response as a JSON object with:
- "query_type": One of "keyword", "natural_language", or "hybrid"
- "reasoning": Brief explanation of why you classified it this way

Only include the JSON object, nothing else."#
    )
}

/// Prompt asking the model for expanded variants and a rewrite.
pub fn query_expansion(query: &str, query_type: QueryType, language: &str) -> String {
    let mut prompt = format!(
        r#"Generate expanded versions of the following search query by adding synonyms, related terms, and alternate phrasings.

Original query: "{query}"
Query type: {query_type}

For {language} language, generate:
1. 3-5 expanded versions that maintain the original intent but add relevant terms
2. 1 completely rewritten version that best expresses the query intent

Return your response as a JSON object with:
- "expanded_queries": Array of expanded query strings
- "rewritten_query": The single best rewritten query

Only include the JSON object, nothing else."#,
        query = query,
        query_type = query_type.as_str(),
        language = language,
    );

    if let Some(examples) = examples_for(language) {
        prompt.push_str(&format!(
            "\n\nExamples for {language}:\nKeyword query: \"{}\"\nNatural language query: \"{}\"\nExample expanded queries: [\"{}\", \"{}\", \"{}\"]\nExample rewritten query: \"{}\"",
            examples.keyword,
            examples.natural,
            examples.expanded[0],
            examples.expanded[1],
            examples.expanded[2],
            examples.rewritten,
        ));
    }

    prompt
}

/// Prompt asking the model to map response sentences to source passages.
pub fn attribution_detection(query: &str, response: &str, sources: &str) -> String {
    format!(
        r#"Analyze the following AI response and determine which parts should be attributed to which source documents.

Original query: {query}

AI response:
{response}

Source documents:
{sources}

For each sentence or claim in the AI response, identify if it should be attributed to one of the sources.
Return your analysis as a JSON array of attribution objects, where each object has:
- "text": The text from the response that should be attributed
- "source_id": The ID of the source document this is from
- "confidence": A number between 0 and 1 indicating your confidence in this attribution

Only include attributions where you are reasonably confident (>0.5).
Only include the JSON array, nothing else."#
    )
}
