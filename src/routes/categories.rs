use axum::Json;
use serde::Serialize;

use crate::models::Category;

#[derive(Debug, Serialize)]
pub struct CategoryOption {
    pub name: &'static str,
    pub value: &'static str,
    pub label: &'static str,
    pub placeholder: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AvailableEntities {
    pub categories_data: Vec<CategoryOption>,
}

fn prompt_copy(category: Category) -> (&'static str, &'static str) {
    match category {
        Category::Movies => (
            "Tell us what kind of movie recommendations you are looking for",
            "e.g., 'I just saw Romeo and Juliet, can you recommend more movies like this..'",
        ),
        Category::TvShows => (
            "Tell us what kind of TV show recommendations you are looking for",
            "e.g., 'I just saw Breaking Bad, can you recommend more shows like this..'",
        ),
        Category::Books => (
            "Tell us what kind of book recommendations you are looking for",
            "e.g., 'I just read The Great Gatsby, can you recommend more books like this..'",
        ),
        Category::Places => (
            "Tell us what kind of place recommendations you are looking for",
            "e.g., 'I am looking for good restaurants in New York, can you recommend some places..'",
        ),
        Category::Destinations => (
            "Tell us what kind of travel destination recommendations you are looking for",
            "e.g., 'I am planning a trip to Europe, can you recommend some destinations..'",
        ),
    }
}

/// Lists the categories offered to users
pub async fn available_entities() -> Json<AvailableEntities> {
    let categories_data = Category::ALL
        .into_iter()
        .filter(Category::is_public)
        .map(|category| {
            let (label, placeholder) = prompt_copy(category);
            CategoryOption {
                name: category.display_name(),
                value: category.display_name(),
                label,
                placeholder,
            }
        })
        .collect();

    Json(AvailableEntities { categories_data })
}
