/// Prompt templates for the intent and scoring calls
use crate::models::Category;

/// System prompt that turns a user message into a fetch intent
pub fn intent_prompt(category: Category) -> String {
    let all_categories = Category::ALL
        .iter()
        .filter(|c| c.is_public())
        .map(|c| c.display_name())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are Recommendi, an assistant that turns a user's message into a search plan for recommendations.

Categories offered to users: {all_categories}
The user selected: {selected}

Reply with a single JSON object and nothing else:
{{
  "is_valid": bool,          // true when the message is about the selected category
  "is_specific": bool,       // true when the message names a concrete entity or a concrete thing in a concrete place
  "keyword": str,            // short search phrase capturing the essence of a specific request, singular where possible
  "generic_term": str,       // genre for media, or type of place, for non-specific requests
  "location": str,           // place the request refers to, or ""
  "should_be_recent": bool,  // true when the user asks for new or recent releases
  "backup_keywords": str     // comma separated single words to try when the keyword finds nothing
}}

Rules:
- A keyword should describe the kind of thing wanted, not repeat the title. "Movies like The Dark Knight Rises" gives "superhero thriller".
- Keep a named author, dish or venue as the keyword when it is what the user wants, e.g. "J.K. Rowling" or "good jollof rice".
- A location-based request is specific only when it also names what the user wants there.
- When is_valid is false, return empty strings for keyword, generic_term and location.
- Do not use markdown."#,
        all_categories = all_categories,
        selected = category.display_name(),
    )
}

/// System prompt that explains and scores one candidate
pub fn scoring_prompt(candidate_json: &str, context_message: &str) -> String {
    format!(
        r#"You are Recommendi. Judge how well a recommendation fits what the user asked for.

User request: {context_message}

Recommendation:
{candidate_json}

Reply with a single JSON object and nothing else:
{{
  "context": str,  // plain text explaining specifically why this is or is not a good fit
  "score": int     // 1 to 10, where 10 is a perfect fit
}}

Consider relevance to the request and the quality of the recommendation data. Do not use markdown."#,
        context_message = context_message,
        candidate_json = candidate_json,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_prompt_lists_public_categories() {
        let prompt = intent_prompt(Category::Books);
        assert!(prompt.contains("The user selected: Books"));
        assert!(prompt.contains("Movies, TV Shows, Books, Places"));
        assert!(!prompt.contains("Destinations"));
    }

    #[test]
    fn test_scoring_prompt_embeds_context() {
        let prompt = scoring_prompt("{\"title\":\"Inception\"}", "mind bending films");
        assert!(prompt.contains("User request: mind bending films"));
        assert!(prompt.contains("\"title\":\"Inception\""));
    }
}
