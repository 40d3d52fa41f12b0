use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, User};
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::db::models::{GenerationRow, UserRow};
use crate::db::LedgerError;
use crate::generation::Style;
use crate::handlers::access::check_admin_access;
use crate::handlers::keyboards::{
    generation_options_keyboard, main_keyboard, topup_keyboard, TOPUP_DEMO_CALLBACK,
    TOPUP_REAL_CALLBACK,
};
use crate::state::AppState;
use crate::utils::telegram::{display_name_of, escape_html, preview, user_id_of};
use crate::utils::timing::start_command_timer;

pub const NOT_REGISTERED_TEXT: &str = "❌ Сначала используйте /start";
const RECENT_GENERATIONS_LIMIT: i64 = 5;

fn mode_line(state: &AppState) -> &'static str {
    if state.generator.is_live() {
        "✅ <b>Режим:</b> Реальная генерация через AI"
    } else {
        "⚠️ <b>Режим:</b> Демо (без реальной генерации)"
    }
}

fn registered_on(user: &UserRow) -> String {
    user.registered_at.format("%Y-%m-%d").to_string()
}

pub async fn registered_user(
    bot: &Bot,
    state: &AppState,
    message: &Message,
) -> Result<Option<UserRow>> {
    let Some(sender) = message.from.as_ref() else {
        return Ok(None);
    };
    match state.db.require_user(user_id_of(sender)).await {
        Ok(user) => Ok(Some(user)),
        Err(LedgerError::UserNotFound(_)) => {
            bot.send_message(message.chat.id, NOT_REGISTERED_TEXT).await?;
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn start_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(sender) = message.from.as_ref() else {
        return Ok(());
    };
    let user_id = user_id_of(sender);
    let mut timer = start_command_timer("start", message.chat.id.0, user_id, message.text());

    let created = state
        .db
        .ensure_user(user_id, sender.username.as_deref(), &display_name_of(sender))
        .await?;

    let text = format!(
        "<b>👋 Привет, {name}!</b>\n\n\
         Я бот для генерации изображений с <b>Нано-Банано</b> 🍌✨\n\n\
         {mode}\n\n\
         <u>Что умею:</u>\n\
         🎨 Генерировать изображения по описанию\n\
         🖼 Обрабатывать загруженные фото\n\
         📁 Хранить историю генераций\n\n\
         <u>Для начала:</u> {free} <b>бесплатные генерации!</b>\n\n\
         <u>Доступные стили:</u>\n{styles}\n\n\
         👇 <b>Выберите действие:</b>",
        name = escape_html(&sender.first_name),
        mode = mode_line(&state),
        free = CONFIG.free_generations,
        styles = style_overview(),
    );
    bot.send_message(message.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_keyboard())
        .await?;
    timer.complete(if created { "registered" } else { "returning" }, None);
    Ok(())
}

fn style_overview() -> String {
    Style::ALL
        .iter()
        .filter(|style| **style != Style::None)
        .map(|style| format!("• {}", style.button_label()))
        .collect::<Vec<_>>()
        .join(" ")
}

pub async fn help_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let text = format!(
        "<b>ℹ️ Помощь по боту</b>\n\n\
         {mode}\n\n\
         <u>Основные команды:</u>\n\
         /start - начало работы\n\
         /generate - создать изображение\n\
         /balance - проверить баланс\n\
         /buy - купить генерации\n\
         /stats - последние генерации\n\
         /cancel - отменить текущую генерацию\n\
         /help - эта справка\n\n\
         <u>Как это работает:</u>\n\
         1. Выбираете тип генерации (с фото или без)\n\
         2. Описываете что хотите\n\
         3. Выбираете стиль\n\
         4. Получаете результат\n\n\
         <u>Тарифы:</u>\n\
         • Первые {free} генерации - <b>бесплатно</b>\n\
         • Дополнительные - через /buy",
        mode = mode_line(&state),
        free = CONFIG.free_generations,
    );
    bot.send_message(message.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_keyboard())
        .await?;
    Ok(())
}

/// Entry point of the wizard: checks the user can pay before offering the options.
pub async fn generate_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(user) = registered_user(&bot, &state, &message).await? else {
        return Ok(());
    };
    if !user.has_remaining() {
        send_out_of_quota(&bot, message.chat.id).await?;
        return Ok(());
    }

    bot.send_message(
        message.chat.id,
        "🎨 <b>Выберите тип генерации:</b>\n\n\
         📝 <b>Только по описанию</b> - создаю с нуля\n\
         🖼 <b>С фото + описание</b> - обрабатываю ваше фото",
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(generation_options_keyboard())
    .await?;
    Ok(())
}

pub async fn send_out_of_quota(bot: &Bot, chat_id: ChatId) -> Result<()> {
    bot.send_message(
        chat_id,
        "❌ <b>Недостаточно генераций!</b>\n\n\
         У вас закончились генерации.\n\
         Пожалуйста, купите дополнительные через /buy",
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(main_keyboard())
    .await?;
    Ok(())
}

pub async fn balance_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(user) = registered_user(&bot, &state, &message).await? else {
        return Ok(());
    };
    let used = state.db.count_generations(user.user_id).await?;

    let mut text = format!(
        "<b>💰 Ваш баланс и статистика</b>\n\n\
         <u>Генерации:</u>\n\
         🎫 <b>Бесплатных осталось:</b> {free}\n\
         💰 <b>Платных на балансе:</b> {paid}\n\
         📊 <b>Всего использовано:</b> {used}\n\n\
         <u>Активность:</u>\n\
         📅 <b>Зарегистрирован:</b> {registered}\n\
         👤 <b>Username:</b> {username}",
        free = user.free_generations,
        paid = user.balance,
        registered = registered_on(&user),
        username = user
            .username
            .as_deref()
            .map(|name| format!("@{}", escape_html(name)))
            .unwrap_or_else(|| "не указан".to_string()),
    );
    if CONFIG.is_admin(user.user_id) {
        text.push_str("\n👑 <b>Статус:</b> Администратор");
    }

    bot.send_message(message.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_keyboard())
        .await?;
    Ok(())
}

pub async fn buy_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(user) = registered_user(&bot, &state, &message).await? else {
        return Ok(());
    };

    let text = format!(
        "<b>🛒 Покупка генераций</b>\n\n\
         <u>Текущий баланс:</u>\n\
         🎫 Бесплатных: {free}\n\
         💰 Платных: {paid}\n\n\
         <u>Для демо-теста:</u>\n\
         <i>Нажмите кнопку ниже чтобы добавить {demo} демо-генераций</i>",
        free = user.free_generations,
        paid = user.balance,
        demo = CONFIG.demo_topup_amount,
    );
    bot.send_message(message.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(topup_keyboard(CONFIG.demo_topup_amount))
        .await?;
    Ok(())
}

pub fn format_recent_generations(rows: &[GenerationRow]) -> String {
    if rows.is_empty() {
        return "<i>Пока нет генераций</i>".to_string();
    }
    let mut text = String::from("<u>Последние запросы:</u>\n");
    for (index, row) in rows.iter().enumerate() {
        text.push_str(&format!(
            "{}. {}\n",
            index + 1,
            escape_html(&preview(&row.prompt, 40))
        ));
    }
    text
}

pub async fn stats_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(user) = registered_user(&bot, &state, &message).await? else {
        return Ok(());
    };
    let recent = state
        .db
        .recent_generations(user.user_id, RECENT_GENERATIONS_LIMIT)
        .await?;

    let text = format!(
        "<b>📊 Ваша статистика</b>\n\n\
         <u>Профиль:</u>\n\
         👤 <b>Имя:</b> {name}\n\
         🆔 <b>ID:</b> {id}\n\
         📅 <b>Регистрация:</b> {registered}\n\n\
         <u>Генерации:</u>\n\
         🎫 <b>Бесплатных осталось:</b> {free}\n\
         💰 <b>Платных на балансе:</b> {paid}\n\
         📈 <b>Всего сгенерировано:</b> {total}\n\n\
         {recent}",
        name = escape_html(user.display_name.as_deref().unwrap_or("-")),
        id = user.user_id,
        registered = registered_on(&user),
        free = user.free_generations,
        paid = user.balance,
        total = user.total_generated,
        recent = format_recent_generations(&recent),
    );
    bot.send_message(message.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_keyboard())
        .await?;
    Ok(())
}

pub async fn admin_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    if !check_admin_access(&bot, &message, "admin").await {
        return Ok(());
    }

    let stats = state.db.ledger_stats().await?;
    let provider = if state.generator.is_live() {
        "✅ Replicate API: подключен"
    } else {
        "❌ Replicate API: не подключен (демо)"
    };
    let text = format!(
        "<b>👑 Админ-панель</b>\n\n\
         <u>Общая статистика:</u>\n\
         👥 <b>Пользователей:</b> {users}\n\
         🎨 <b>Всего генераций:</b> {generated}\n\
         💰 <b>Общий баланс:</b> {balance} генераций\n\n\
         <u>Сейчас:</u>\n\
         🧭 <b>Активных сессий:</b> {sessions}\n\
         ⏳ <b>Генераций в процессе:</b> {in_flight}\n\n\
         {provider}\n\n\
         <i>Пополнение: /credit &lt;user_id&gt; &lt;amount&gt;</i>",
        users = stats.total_users,
        generated = stats.total_generated,
        balance = stats.total_balance,
        sessions = state.sessions.active_sessions(),
        in_flight = state.sessions.dispatching_count(),
    );
    bot.send_message(message.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

pub fn parse_credit_args(args: &str) -> Option<(i64, i64)> {
    let mut parts = args.split_whitespace();
    let user_id = parts.next()?.parse().ok()?;
    let amount = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((user_id, amount))
}

pub async fn credit_handler(bot: Bot, state: AppState, message: Message, args: String) -> Result<()> {
    if !check_admin_access(&bot, &message, "credit").await {
        return Ok(());
    }
    let Some((user_id, amount)) = parse_credit_args(&args) else {
        bot.send_message(message.chat.id, "Использование: /credit <user_id> <amount>")
            .await?;
        return Ok(());
    };

    let reply = match state.db.credit(user_id, amount).await {
        Ok(user) => {
            info!(user_id, amount, "Admin credited balance");
            format!(
                "✅ Пользователю {} начислено {} генераций. Баланс: {}",
                user.user_id, amount, user.balance
            )
        }
        Err(LedgerError::UserNotFound(_)) => format!("❌ Пользователь {user_id} не найден"),
        Err(LedgerError::InvalidAmount(_)) => "❌ Недопустимое количество генераций".to_string(),
        Err(err) => return Err(err.into()),
    };
    bot.send_message(message.chat.id, reply).await?;
    Ok(())
}

async fn answer_topup(bot: &Bot, query: &CallbackQuery, text: &str) -> Result<()> {
    bot.answer_callback_query(query.id.clone()).text(text).await?;
    Ok(())
}

pub async fn topup_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let Some(chat_id) = query.message.as_ref().map(|message| message.chat().id) else {
        bot.answer_callback_query(query.id.clone()).await?;
        return Ok(());
    };
    let user: &User = &query.from;
    let user_id = user_id_of(user);

    match query.data.as_deref() {
        Some(TOPUP_DEMO_CALLBACK) => {
            let amount = CONFIG.demo_topup_amount;
            match state.db.credit(user_id, amount).await {
                Ok(updated) => {
                    answer_topup(&bot, &query, &format!("✅ +{amount} генераций добавлено!")).await?;
                    info!(user_id, amount, "Demo top-up applied");
                    bot.send_message(
                        chat_id,
                        format!(
                            "🎉 <b>Демо-режим активирован!</b>\n\n\
                             Вам добавлено <b>{amount} платных генераций</b>\n\n\
                             <u>Теперь ваш баланс:</u>\n\
                             🎫 Бесплатных: {}\n\
                             💰 Платных: {}",
                            updated.free_generations, updated.balance
                        ),
                    )
                    .parse_mode(ParseMode::Html)
                    .reply_markup(main_keyboard())
                    .await?;
                }
                Err(LedgerError::UserNotFound(_)) => {
                    answer_topup(&bot, &query, NOT_REGISTERED_TEXT).await?;
                }
                Err(err) => {
                    warn!(user_id, "Demo top-up failed: {err}");
                    answer_topup(&bot, &query, "❌ Не удалось пополнить баланс").await?;
                }
            }
        }
        Some(TOPUP_REAL_CALLBACK) => {
            answer_topup(&bot, &query, "⚠️ Реальная оплата появится в следующем обновлении").await?;
            bot.send_message(
                chat_id,
                "💳 <b>Реальная оплата скоро!</b>\n\nСледите за обновлениями!",
            )
            .parse_mode(ParseMode::Html)
            .reply_markup(main_keyboard())
            .await?;
        }
        _ => {
            bot.answer_callback_query(query.id.clone()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn row(id: i64, prompt: &str) -> GenerationRow {
        GenerationRow {
            id,
            user_id: 1,
            prompt: prompt.to_string(),
            created_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn credit_args_need_exactly_two_integers() {
        assert_eq!(parse_credit_args("42 10"), Some((42, 10)));
        assert_eq!(parse_credit_args("  42   -3 "), Some((42, -3)));
        assert_eq!(parse_credit_args("42"), None);
        assert_eq!(parse_credit_args("42 ten"), None);
        assert_eq!(parse_credit_args("42 10 extra"), None);
    }

    #[test]
    fn recent_generations_are_numbered_and_escaped() {
        let text = format_recent_generations(&[
            row(2, "<b>кот</b> [Стиль: Аниме]"),
            row(1, "Добавь снег [Стиль: Классика]"),
        ]);
        assert!(text.starts_with("<u>Последние запросы:</u>\n1. &lt;b&gt;"));
        assert!(text.contains("2. Добавь снег"));
    }

    #[test]
    fn empty_history_has_placeholder() {
        assert_eq!(format_recent_generations(&[]), "<i>Пока нет генераций</i>");
    }
}
