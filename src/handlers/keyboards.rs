use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use crate::generation::Style;

pub const MENU_GENERATE: &str = "🎨 Сгенерировать изображение";
pub const MENU_UPLOAD_PHOTO: &str = "🖼 Загрузить фото для обработки";
pub const MENU_BALANCE: &str = "💰 Баланс";
pub const MENU_BUY: &str = "🛒 Купить";
pub const MENU_STATS: &str = "📊 Статистика";
pub const MENU_HELP: &str = "ℹ️ Помощь";
pub const OPTION_TEXT_ONLY: &str = "📝 Только по описанию";
pub const OPTION_WITH_PHOTO: &str = "🖼 С фото + описание";
pub const CANCEL_LABEL: &str = "❌ Отмена";
pub const SKIP_PHOTO_WORD: &str = "пропустить";

pub const TOPUP_DEMO_CALLBACK: &str = "topup_demo";
pub const TOPUP_REAL_CALLBACK: &str = "topup_real";

fn reply_keyboard(rows: &[&[&str]]) -> KeyboardMarkup {
    let rows = rows
        .iter()
        .map(|row| row.iter().map(|label| KeyboardButton::new(*label)).collect())
        .collect::<Vec<Vec<_>>>();
    KeyboardMarkup::new(rows).resize_keyboard()
}

pub fn main_keyboard() -> KeyboardMarkup {
    reply_keyboard(&[
        &[MENU_GENERATE],
        &[MENU_UPLOAD_PHOTO],
        &[MENU_BALANCE, MENU_BUY],
        &[MENU_STATS, MENU_HELP],
    ])
}

pub fn generation_options_keyboard() -> KeyboardMarkup {
    reply_keyboard(&[&[OPTION_TEXT_ONLY], &[OPTION_WITH_PHOTO], &[CANCEL_LABEL]]).one_time_keyboard()
}

pub fn cancel_keyboard() -> KeyboardMarkup {
    reply_keyboard(&[&[CANCEL_LABEL]]).one_time_keyboard()
}

pub fn style_keyboard() -> InlineKeyboardMarkup {
    let button = |style: Style| InlineKeyboardButton::callback(style.button_label(), style.callback_data());
    InlineKeyboardMarkup::new(vec![
        vec![button(Style::Anime), button(Style::Realistic)],
        vec![button(Style::Art), button(Style::Fantasy)],
        vec![
            button(Style::Cyberpunk),
            button(Style::Classic),
            button(Style::None),
        ],
    ])
}

pub fn topup_keyboard(demo_amount: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            format!("🎁 Демо: +{demo_amount} генераций"),
            TOPUP_DEMO_CALLBACK,
        )],
        vec![InlineKeyboardButton::callback(
            "💳 Реальная оплата (скоро)",
            TOPUP_REAL_CALLBACK,
        )],
    ])
}

pub fn is_menu_label(text: &str) -> bool {
    [
        MENU_GENERATE,
        MENU_UPLOAD_PHOTO,
        MENU_BALANCE,
        MENU_BUY,
        MENU_STATS,
        MENU_HELP,
        OPTION_TEXT_ONLY,
        OPTION_WITH_PHOTO,
        CANCEL_LABEL,
    ]
    .contains(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_keyboard_offers_every_style_once() {
        let keyboard = style_keyboard();
        let buttons: Vec<_> = keyboard.inline_keyboard.iter().flatten().collect();
        assert_eq!(buttons.len(), Style::ALL.len());
    }

    #[test]
    fn menu_labels_are_recognised() {
        assert!(is_menu_label(MENU_BALANCE));
        assert!(is_menu_label(CANCEL_LABEL));
        assert!(!is_menu_label("Добавь снег"));
    }
}
