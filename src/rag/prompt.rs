use std::collections::BTreeSet;

use crate::api_connection::Prompt;
use crate::rag::context_builder::RagContext;
use crate::search::catalog_index::SearchResult;

/// Generated answers shorter than this are replaced by the fallback text.
pub const MIN_RESPONSE_CHARS: usize = 50;

const RECOMMENDER_SYSTEM: &str = "You are a helpful food recommendation assistant.";
const COMPARISON_SYSTEM: &str = "You are a helpful food recommendation assistant for comparing queries.";
const CONTEXT_HEADER: &str = "Based on the user's query, here are the most relevant food options from our database:";

fn context_block(context: &RagContext) -> String {
    if context.is_grounded() {
        format!("{}\n\n{}", CONTEXT_HEADER, context.render())
    } else {
        context.render()
    }
}

pub fn recommendation_prompt(context: &RagContext) -> Prompt {
    let user = format!(
        r#"You are a helpful food recommendation assistant. A user is asking for food recommendations, and I've retrieved relevant options from a food database.

User Query: "{query}"

Retrieved Food Information:
{context}

Please provide a helpful, short response that:
1. Acknowledges the user's request
2. Recommends 2-3 specific food items from the retrieved options
3. Explains why these recommendations match their request
4. Includes relevant details like cuisine type, calories, or health benefits
5. Uses a friendly, conversational tone
6. Keeps the response concise but informative

Response:"#,
        query = context.query,
        context = context_block(context),
    );
    Prompt::new(RECOMMENDER_SYSTEM, user).with_max_tokens(400)
}

pub fn comparison_prompt(first: &RagContext, second: &RagContext) -> Prompt {
    let user = format!(
        r#"You are analyzing and comparing two different food preference queries. Please provide a thoughtful comparison.

Query 1: "{q1}"
Top Results for Query 1:
{c1}

Query 2: "{q2}"
Top Results for Query 2:
{c2}

Please provide a short comparison that:
1. Highlights the key differences between these two food preferences
2. Notes any similarities or overlaps
3. Explains which query might be better for different situations
4. Recommends the best option from each query
5. Keeps the analysis concise but insightful

Comparison:"#,
        q1 = first.query,
        c1 = context_block(first),
        q2 = second.query,
        c2 = context_block(second),
    );
    Prompt::new(COMPARISON_SYSTEM, user).with_max_tokens(500)
}

/// Template answer built straight from the top results.
pub fn fallback_response(query: &str, results: &[SearchResult]) -> String {
    let Some(top) = results.first() else {
        return "I couldn't find any food items matching your request. Try describing what you're in the mood for with different words!".to_string();
    };

    let mut response = format!(
        "Based on your request for '{}', I'd recommend {}. It's a {} dish with {} calories per serving.",
        query, top.item.name, top.item.cuisine, top.item.calories
    );
    if let Some(second) = results.get(1) {
        response.push_str(&format!(" Another great option would be {}.", second.item.name));
    }
    response
}

pub fn simple_comparison(
    first_query: &str,
    second_query: &str,
    first: &[SearchResult],
    second: &[SearchResult],
) -> String {
    match (first.first(), second.first()) {
        (None, None) => "No results found for either query.".to_string(),
        (None, Some(_)) => format!("Found results for '{}' but none for '{}'.", second_query, first_query),
        (Some(_), None) => format!("Found results for '{}' but none for '{}'.", first_query, second_query),
        (Some(a), Some(b)) => format!(
            "For '{}', I recommend {}. For '{}', {} would be perfect.",
            first_query, a.item.name, second_query, b.item.name
        ),
    }
}

/// Follow-up query ideas: up to three cuisines seen in the results, then a
/// calorie hint depending on whether the results skew heavy.
pub fn suggest_related_searches(results: &[SearchResult]) -> Vec<String> {
    if results.is_empty() {
        return Vec::new();
    }

    let mut seen = BTreeSet::new();
    let mut suggestions: Vec<String> = results
        .iter()
        .map(|r| r.item.cuisine.as_str())
        .filter(|cuisine| seen.insert(*cuisine))
        .take(3)
        .map(|cuisine| format!("Try '{} dishes' for more {} options", cuisine, cuisine))
        .collect();

    let avg_calories = results.iter().map(|r| r.item.calories).sum::<f64>() / results.len() as f64;
    if avg_calories > 350.0 {
        suggestions.push("Try 'low calorie' for lighter options".to_string());
    } else {
        suggestions.push("Try 'hearty meal' for more substantial dishes".to_string());
    }
    suggestions
}
