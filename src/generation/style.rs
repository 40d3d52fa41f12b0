pub const STYLE_CALLBACK_PREFIX: &str = "style_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Style {
    Anime,
    Realistic,
    Art,
    Fantasy,
    Cyberpunk,
    Classic,
    None,
}

impl Style {
    pub const ALL: [Style; 7] = [
        Style::Anime,
        Style::Realistic,
        Style::Art,
        Style::Fantasy,
        Style::Cyberpunk,
        Style::Classic,
        Style::None,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Style::Anime => "anime",
            Style::Realistic => "realistic",
            Style::Art => "art",
            Style::Fantasy => "fantasy",
            Style::Cyberpunk => "cyberpunk",
            Style::Classic => "classic",
            Style::None => "none",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Style::ALL
            .into_iter()
            .find(|style| style.tag().eq_ignore_ascii_case(tag.trim()))
    }

    pub fn callback_data(self) -> String {
        format!("{STYLE_CALLBACK_PREFIX}{}", self.tag())
    }

    pub fn from_callback_data(data: &str) -> Option<Self> {
        data.strip_prefix(STYLE_CALLBACK_PREFIX)
            .and_then(Style::from_tag)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Style::Anime => "Аниме",
            Style::Realistic => "Реализм",
            Style::Art => "Арт",
            Style::Fantasy => "Фэнтези",
            Style::Cyberpunk => "Киберпанк",
            Style::Classic => "Классика",
            Style::None => "Без стиля",
        }
    }

    pub fn button_label(self) -> &'static str {
        match self {
            Style::Anime => "🎨 Аниме",
            Style::Realistic => "🖼 Реализм",
            Style::Art => "🌈 Арт",
            Style::Fantasy => "✨ Фэнтези",
            Style::Cyberpunk => "🚀 Киберпанк",
            Style::Classic => "🏛 Классика",
            Style::None => "🎭 Без стиля",
        }
    }

    pub fn prompt_suffix(self) -> &'static str {
        match self {
            Style::Anime => "anime style, detailed, vibrant colors, beautiful, masterpiece",
            Style::Realistic => "photorealistic, 8K, high detail, professional photography",
            Style::Art => "digital art, artistic, painting, trending on artstation",
            Style::Fantasy => "fantasy art, magical, mystical, epic, lord of the rings style",
            Style::Cyberpunk => "cyberpunk, neon, futuristic, blade runner, night city",
            Style::Classic => "classical painting, oil on canvas, masterpiece, renaissance",
            Style::None => "high quality, detailed, beautiful",
        }
    }

    /// Stand-in image returned whenever the provider is unavailable.
    pub fn fallback_url(self) -> &'static str {
        match self {
            Style::Anime => "https://i.imgur.com/WqYp8Q2.png",
            Style::Realistic => "https://i.imgur.com/3nQqY9y.jpg",
            Style::Art => "https://i.imgur.com/5nYp8Q1.png",
            Style::Fantasy => "https://i.imgur.com/7nQpY9x.jpg",
            Style::Cyberpunk => "https://i.imgur.com/9nYqP8W.png",
            Style::Classic => "https://i.imgur.com/2nQpY8X.jpg",
            Style::None => "https://i.imgur.com/4nYqP9Z.png",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_maps_back_to_the_style() {
        for style in Style::ALL {
            assert_eq!(Style::from_callback_data(&style.callback_data()), Some(style));
        }
        assert_eq!(Style::from_callback_data("style_watercolor"), None);
        assert_eq!(Style::from_callback_data("topup_demo"), None);
    }

    #[test]
    fn every_style_has_a_distinct_fallback() {
        let mut urls: Vec<_> = Style::ALL.iter().map(|style| style.fallback_url()).collect();
        urls.sort_unstable();
        urls.dedup();
        assert_eq!(urls.len(), Style::ALL.len());
    }
}
