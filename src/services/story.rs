use crate::models::{GenerationParams, StoryPart};
use crate::services::llm::LazyModel;
use crate::utils::clean_text;

pub const MODEL_LOAD_FAILED: &str = "Error: Model failed to load.";

pub fn build_prompt(part: StoryPart, title: &str, characters: &str, story_type: &str) -> String {
    match part {
        StoryPart::Beginning => format!(
            "Title: {title}\n\
             Characters: {characters}\n\
             Story Type: {story_type}\n\n\
             Once upon a time, {characters} were living their usual lives until something unexpected happened \
             that set them on a new path in this story. "
        ),
        StoryPart::Middle => format!(
            "As the story unfolded in this tale, {characters} encountered numerous challenges. \
             They met new people and discovered important truths. Every step tested their strength, intelligence, \
             and courage, but they pressed on, determined to overcome every obstacle. "
        ),
        StoryPart::End => format!(
            "In the end, after all the struggles and adventures in this journey, {characters} found what \
             they were looking for. They learned valuable lessons, grew as individuals, and their journey finally led them \
             to a hopeful new beginning filled with promise and wisdom."
        ),
    }
}

/// Generates the beginning, middle and end of a story.
///
/// Returns a single error paragraph when the model cannot be loaded. A part
/// whose generation fails is replaced by a placeholder naming that part.
pub async fn generate_story(
    model: &LazyModel,
    title: &str,
    characters: &str,
    story_type: &str,
) -> Vec<String> {
    let story_gen = match model.get().await {
        Ok(story_gen) => story_gen,
        Err(_) => return vec![MODEL_LOAD_FAILED.to_string()],
    };

    let params = GenerationParams::default();
    let mut story_paragraphs = Vec::with_capacity(StoryPart::ALL.len());

    for part in StoryPart::ALL {
        let prompt = build_prompt(part, title, characters, story_type);
        match story_gen.generate(&prompt, &params).await {
            Ok(generated_text) => story_paragraphs.push(clean_text(&generated_text)),
            Err(e) => {
                tracing::error!("Error generating {} part: {}", part, e);
                story_paragraphs.push(format!("Error generating {} part.", part));
            }
        }
    }

    story_paragraphs
}
