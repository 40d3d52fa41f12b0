use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, MessageId, ParseMode};
use tracing::{error, info, warn};
use url::Url;

use crate::db::models::QuotaCharge;
use crate::db::{Database, LedgerError};
use crate::generation::{FallbackReason, ImageResult, Style};
use crate::handlers::access::is_rate_limited;
use crate::handlers::commands::{registered_user, send_out_of_quota, NOT_REGISTERED_TEXT};
use crate::handlers::keyboards::{cancel_keyboard, main_keyboard, style_keyboard, SKIP_PHOTO_WORD};
use crate::handlers::media::{download_photo, largest_photo, load_reference};
use crate::session::flow::PROMPT_MIN_CHARS;
use crate::session::{DispatchGuard, FlowError, ReadyRequest, SessionKey, WizardStep};
use crate::state::AppState;
use crate::utils::telegram::{display_name_of, escape_html, preview, start_chat_action_heartbeat, user_id_of};
use crate::utils::timing::start_command_timer;

pub const GENERATION_IN_PROGRESS_TEXT: &str =
    "⏳ Предыдущая генерация ещё выполняется, дождитесь результата";

pub fn flow_error_text(err: &FlowError) -> &'static str {
    match err {
        FlowError::InvalidPrompt { length } if *length < PROMPT_MIN_CHARS => {
            "❌ Слишком короткое описание. Попробуйте снова:"
        }
        FlowError::InvalidPrompt { .. } => {
            "❌ Слишком длинное описание (макс. 1000 символов). Попробуйте короче:"
        }
        FlowError::MissingPhoto => "❌ Пожалуйста, загрузите фото или напишите 'пропустить'",
        FlowError::UnexpectedInput { step } => match step {
            WizardStep::Idle => "👇 Выберите действие в меню или отправьте /generate",
            WizardStep::AwaitingPhoto => "🖼 Сейчас нужно фото или слово 'пропустить'",
            WizardStep::AwaitingPrompt => "✍️ Сейчас нужно текстовое описание",
            WizardStep::AwaitingStyle => "🎨 Выберите стиль кнопками выше",
        },
    }
}

pub fn generation_log_entry(prompt: &str, style: Style) -> String {
    format!("{prompt} [Стиль: {}]", style.display_name())
}

fn message_key(message: &Message) -> SessionKey {
    let user_id = message.from.as_ref().map(user_id_of).unwrap_or_default();
    SessionKey::new(message.chat.id.0, user_id)
}

/// Charges the user and appends the history row. A failed history insert does not undo the charge.
pub async fn charge_for_request(
    db: &Database,
    user_id: i64,
    ready: &ReadyRequest,
) -> Result<QuotaCharge, LedgerError> {
    let charge = db.consume_one(user_id).await?;
    let entry = generation_log_entry(&ready.prompt, ready.style);
    if let Err(err) = db.record_generation(user_id, &entry).await {
        warn!(user_id, "Generation charged but not recorded: {err}");
    }
    Ok(charge)
}

async fn reply(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    bot.send_message(chat_id, text)
        .reply_markup(cancel_keyboard())
        .await?;
    Ok(())
}

async fn reject_if_dispatching(bot: &Bot, state: &AppState, message: &Message) -> Result<bool> {
    if !state.sessions.is_dispatching(message_key(message)) {
        return Ok(false);
    }
    bot.send_message(message.chat.id, GENERATION_IN_PROGRESS_TEXT).await?;
    Ok(true)
}

async fn ask_for_prompt(bot: &Bot, chat_id: ChatId, header: &str) -> Result<()> {
    bot.send_message(
        chat_id,
        format!(
            "{header}\n\n\
             ✍️ <b>Опишите что вы хотите сгенерировать:</b>\n\n\
             <i>Примеры:</i>\n\
             • Нано-Банано в космосе с планетами\n\
             • Добавь снег\n\
             • Преврати в картину маслом\n\n\
             <i>Чем подробнее - тем лучше результат!</i>"
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(cancel_keyboard())
    .await?;
    Ok(())
}

/// Starts a fresh wizard run, either waiting for a photo or going straight to the prompt.
pub async fn begin_wizard(bot: Bot, state: AppState, message: Message, with_photo: bool) -> Result<()> {
    let chat_id = message.chat.id;
    if reject_if_dispatching(&bot, &state, &message).await? {
        return Ok(());
    }
    let Some(user) = registered_user(&bot, &state, &message).await? else {
        return Ok(());
    };
    if !user.has_remaining() {
        return send_out_of_quota(&bot, chat_id).await;
    }

    let outcome = state.sessions.with_session(message_key(&message), |session| {
        session.start();
        if with_photo {
            Ok(())
        } else {
            session.skip_photo()
        }
    });
    if let Err(err) = outcome {
        return reply(&bot, chat_id, flow_error_text(&err)).await;
    }

    if with_photo {
        bot.send_message(
            chat_id,
            "🖼 <b>Загрузите фото для обработки:</b>\n\n\
             <i>Формат: JPG, PNG. Чем лучше качество - тем лучше результат</i>\n\n\
             <b>Или напишите 'пропустить' для генерации без фото</b>",
        )
        .parse_mode(ParseMode::Html)
        .reply_markup(cancel_keyboard())
        .await?;
        Ok(())
    } else {
        ask_for_prompt(&bot, chat_id, "📝 <b>Генерация по описанию</b>").await
    }
}

pub async fn photo_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let chat_id = message.chat.id;
    let key = message_key(&message);
    if reject_if_dispatching(&bot, &state, &message).await? {
        return Ok(());
    }

    match state.sessions.step(key) {
        WizardStep::AwaitingPhoto => {}
        WizardStep::Idle => {
            // A photo sent outside a run opens one.
            let Some(user) = registered_user(&bot, &state, &message).await? else {
                return Ok(());
            };
            if !user.has_remaining() {
                return send_out_of_quota(&bot, chat_id).await;
            }
        }
        other => {
            let err = FlowError::UnexpectedInput { step: other };
            return reply(&bot, chat_id, flow_error_text(&err)).await;
        }
    }

    let Some(photo) = message.photo().and_then(largest_photo) else {
        return Ok(());
    };
    let stored = match download_photo(&bot, photo).await {
        Ok(stored) => stored,
        Err(err) => {
            warn!(chat_id = chat_id.0, "Photo download failed: {err:#}");
            return reply(&bot, chat_id, "❌ Не удалось загрузить фото, отправьте его ещё раз").await;
        }
    };

    let outcome = state.sessions.with_session(key, |session| {
        if session.is_idle() {
            session.start();
        }
        session.submit_photo(stored)
    });
    match outcome {
        Ok(()) => {
            ask_for_prompt(&bot, chat_id, "✅ <b>Фото загружено!</b> Опишите что сделать с фото.").await
        }
        Err(err) => reply(&bot, chat_id, flow_error_text(&err)).await,
    }
}

/// Free text that is neither a command nor a menu button.
pub async fn text_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let chat_id = message.chat.id;
    let key = message_key(&message);
    let Some(text) = message.text() else {
        return Ok(());
    };
    if reject_if_dispatching(&bot, &state, &message).await? {
        return Ok(());
    }

    match state.sessions.step(key) {
        WizardStep::Idle => {
            let err = FlowError::UnexpectedInput {
                step: WizardStep::Idle,
            };
            bot.send_message(chat_id, flow_error_text(&err))
                .reply_markup(main_keyboard())
                .await?;
            Ok(())
        }
        WizardStep::AwaitingPhoto if text.trim().to_lowercase() == SKIP_PHOTO_WORD => {
            if let Err(err) = state.sessions.with_session(key, |s| s.skip_photo()) {
                return reply(&bot, chat_id, flow_error_text(&err)).await;
            }
            ask_for_prompt(&bot, chat_id, "✅ Пропускаем загрузку фото").await
        }
        WizardStep::AwaitingPrompt => {
            if state.db.get_user(key.user_id).await?.is_none() {
                let _ = state.sessions.with_session(key, |s| s.cancel());
                bot.send_message(chat_id, NOT_REGISTERED_TEXT)
                    .reply_markup(main_keyboard())
                    .await?;
                return Ok(());
            }
            submit_prompt(&bot, &state, key, chat_id, text).await
        }
        _ => submit_prompt(&bot, &state, key, chat_id, text).await,
    }
}

async fn submit_prompt(
    bot: &Bot,
    state: &AppState,
    key: SessionKey,
    chat_id: ChatId,
    text: &str,
) -> Result<()> {
    let outcome = state.sessions.with_session(key, |session| {
        session
            .submit_prompt(text)
            .map(|()| session.has_photo())
    });
    match outcome {
        Ok(with_photo) => {
            let suffix = if with_photo { " с фото" } else { "" };
            bot.send_message(
                chat_id,
                format!(
                    "🎨 <b>Выберите стиль для генерации{suffix}:</b>\n\n\
                     📝 <b>Ваш запрос:</b>\n<i>{}</i>\n\n\
                     <i>Или выберите 'Без стиля' для генерации как есть</i>",
                    escape_html(&preview(text.trim(), 100))
                ),
            )
            .parse_mode(ParseMode::Html)
            .reply_markup(style_keyboard())
            .await?;
            Ok(())
        }
        Err(err) => reply(bot, chat_id, flow_error_text(&err)).await,
    }
}

pub async fn cancel_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let text = match state.sessions.with_session(message_key(&message), |s| s.cancel()) {
        Ok(()) => "❌ Генерация отменена",
        Err(_) => "Нечего отменять",
    };
    bot.send_message(message.chat.id, text)
        .reply_markup(main_keyboard())
        .await?;
    Ok(())
}

/// Callback answers are cosmetic; a stale query must not abort the flow.
async fn answer(bot: &Bot, query: &CallbackQuery, text: &str) {
    if let Err(err) = bot.answer_callback_query(query.id.clone()).text(text).await {
        warn!("answer_callback_query failed: {err}");
    }
}

pub async fn style_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let style = query.data.as_deref().and_then(Style::from_callback_data);
    let chat_id = query.message.as_ref().map(|message| message.chat().id);
    let (Some(style), Some(chat_id)) = (style, chat_id) else {
        answer(&bot, &query, "").await;
        return Ok(());
    };
    let user_id = user_id_of(&query.from);
    let key = SessionKey::new(chat_id.0, user_id);

    if state.sessions.is_dispatching(key) {
        answer(&bot, &query, GENERATION_IN_PROGRESS_TEXT).await;
        return Ok(());
    }
    let step = state.sessions.step(key);
    if step != WizardStep::AwaitingStyle {
        answer(&bot, &query, flow_error_text(&FlowError::UnexpectedInput { step })).await;
        return Ok(());
    }
    let Some(guard) = state.sessions.begin_dispatch(key) else {
        answer(&bot, &query, GENERATION_IN_PROGRESS_TEXT).await;
        return Ok(());
    };
    if is_rate_limited(user_id) {
        answer(&bot, &query, "⏳ Слишком часто, попробуйте через несколько секунд").await;
        return Ok(());
    }

    let ready = match state.sessions.with_session(key, |s| s.submit_style(style)) {
        Ok(ready) => ready,
        Err(err) => {
            answer(&bot, &query, flow_error_text(&err)).await;
            return Ok(());
        }
    };

    let charge = match charge_for_request(&state.db, user_id, &ready).await {
        Ok(charge) => charge,
        Err(LedgerError::InsufficientQuota(_)) => {
            answer(&bot, &query, "❌ Недостаточно генераций!").await;
            return send_out_of_quota(&bot, chat_id).await;
        }
        Err(LedgerError::UserNotFound(_)) => {
            answer(&bot, &query, NOT_REGISTERED_TEXT).await;
            return Ok(());
        }
        Err(err) => {
            answer(&bot, &query, "❌ Ошибка, попробуйте позже").await;
            return Err(err.into());
        }
    };

    // Charged: from here on the generation must run whatever Telegram answers.
    let job = GenerationJob {
        chat_id,
        user_id,
        requester: display_name_of(&query.from),
        ready,
        charge,
    };
    let task_bot = bot.clone();
    tokio::spawn(async move {
        if let Err(err) = run_generation(task_bot, state, job, guard).await {
            error!("generation task failed: {err:#}");
        }
    });
    answer(&bot, &query, &format!("✅ Выбран стиль: {}", style.display_name())).await;
    Ok(())
}

struct GenerationJob {
    chat_id: ChatId,
    user_id: i64,
    requester: String,
    ready: ReadyRequest,
    charge: QuotaCharge,
}

pub fn result_caption(
    prompt: &str,
    style: Style,
    charge: &QuotaCharge,
    with_photo: bool,
    requester: &str,
    result: &ImageResult,
) -> String {
    let mode = if result.is_generated() {
        "🤖 <b>Режим:</b> Реальная AI генерация"
    } else {
        "🎭 <b>Режим:</b> Демо"
    };
    format!(
        "<b>✅ Готово! Изображение создано</b>\n\n\
         📝 <b>Запрос:</b> {prompt}\n\
         🎨 <b>Стиль:</b> {style}\n\
         🎫 <b>Тип генерации:</b> {kind}\n\
         🖼 <b>С фото:</b> {photo}\n\
         👤 <b>Для:</b> {requester}\n\
         {mode}\n\n\
         🎫 <b>Бесплатных осталось:</b> {free}\n\
         💰 <b>Платных осталось:</b> {paid}",
        prompt = escape_html(&preview(prompt, 120)),
        style = style.display_name(),
        kind = charge.kind.label(),
        photo = if with_photo { "Да" } else { "Нет" },
        requester = escape_html(requester),
        free = charge.remaining.free_generations,
        paid = charge.remaining.balance,
    )
}

fn fallback_detail(result: &ImageResult) -> Option<&str> {
    match result {
        ImageResult::Generated { .. } => None,
        ImageResult::Fallback {
            reason: FallbackReason::NoCredential,
            ..
        } => Some("no_credential"),
        ImageResult::Fallback {
            reason: FallbackReason::ProviderFailure(detail),
            ..
        } => Some(detail.as_str()),
    }
}

async fn send_status(bot: &Bot, chat_id: ChatId, ready: &ReadyRequest, charge: &QuotaCharge) -> Option<MessageId> {
    let text = format!(
        "⚡ <b>Начинаю генерацию...</b>\n\n\
         📝 <b>Запрос:</b> <i>{}</i>\n\
         🎨 <b>Стиль:</b> {}\n\
         🖼 <b>Тип:</b> {}\n\
         🎫 <b>Списано:</b> {}",
        escape_html(&preview(&ready.prompt, 100)),
        ready.style.display_name(),
        if ready.photo.is_some() { "С фото" } else { "Текстовая" },
        charge.kind.label(),
    );
    match bot.send_message(chat_id, text).parse_mode(ParseMode::Html).await {
        Ok(message) => Some(message.id),
        Err(err) => {
            warn!(chat_id = chat_id.0, "Generation status message failed: {err}");
            None
        }
    }
}

async fn run_generation(
    bot: Bot,
    state: AppState,
    job: GenerationJob,
    _guard: DispatchGuard,
) -> Result<()> {
    let GenerationJob {
        chat_id,
        user_id,
        requester,
        ready,
        charge,
    } = job;
    let mut timer = start_command_timer("generate", chat_id.0, user_id, Some(&ready.prompt));
    let with_photo = ready.photo.is_some();

    let status = send_status(&bot, chat_id, &ready, &charge).await;

    let result = {
        let _action = start_chat_action_heartbeat(bot.clone(), chat_id, ChatAction::UploadPhoto);
        let reference = match &ready.photo {
            Some(photo) => load_reference(photo).await,
            None => None,
        };
        state
            .generator
            .dispatch(&ready.prompt, ready.style, reference.as_ref())
            .await
    };

    let caption = result_caption(
        &ready.prompt,
        ready.style,
        &charge,
        with_photo,
        &requester,
        &result,
    );
    drop(ready);

    if let Some(status) = status {
        if let Err(err) = bot.delete_message(chat_id, status).await {
            warn!("Failed to remove generation status message: {err}");
        }
    }
    let delivered = deliver_result(&bot, chat_id, &result, caption).await;

    info!(
        user_id,
        generated = result.is_generated(),
        delivered = delivered.is_ok(),
        "Generation finished"
    );
    let outcome = match (&delivered, result.is_generated()) {
        (Err(_), _) => "undelivered",
        (Ok(()), true) => "generated",
        (Ok(()), false) => "fallback",
    };
    timer.complete(outcome, fallback_detail(&result));
    delivered
}

async fn send_photo(bot: &Bot, chat_id: ChatId, url: &str, caption: String) -> Result<()> {
    let url = Url::parse(url)?;
    bot.send_photo(chat_id, InputFile::url(url))
        .caption(caption)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Sends the image. If Telegram refuses it, the user still gets the raw link.
async fn deliver_result(bot: &Bot, chat_id: ChatId, result: &ImageResult, caption: String) -> Result<()> {
    if let Err(err) = send_photo(bot, chat_id, result.url(), caption).await {
        warn!(chat_id = chat_id.0, "Image delivery failed: {err:#}");
        bot.send_message(
            chat_id,
            format!(
                "⚠️ <b>Изображение сгенерировано, но возникла ошибка при отправке</b>\n\n\
                 <b>Ссылка на изображение:</b>\n<code>{}</code>\n\n\
                 <i>Попробуйте скопировать ссылку и открыть в браузере</i>",
                escape_html(result.url())
            ),
        )
        .parse_mode(ParseMode::Html)
        .reply_markup(main_keyboard())
        .await?;
        return Ok(());
    }

    let mut text = String::from("🎉 <b>Изображение готово!</b>\n\n");
    if !result.is_generated() {
        text.push_str("⚠️ <i>Сейчас в демо-режиме, показано примерное изображение.</i>\n\n");
    }
    text.push_str("👉 Хотите сгенерировать еще? Выберите действие:");
    if let Err(err) = bot
        .send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_keyboard())
        .await
    {
        warn!(chat_id = chat_id.0, "Follow-up menu message failed: {err}");
    }
    Ok(())
}
