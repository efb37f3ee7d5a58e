use std::sync::Arc;

use teloxide::prelude::*;

use vaultlink_core::{
    collection::{CollectMode, Step},
    domain::ChatId,
    formatting::escape_html,
    security::is_operator,
};

use crate::{router::AppState, send_html};

use super::{broadcast, collect::report_step, deliver, sender};

const OPERATOR_HELP: &str = "<b>VaultLink</b>\n\n\
<b>Links</b>\n\
/genlink - link to one archive post\n\
/batch - link to a range (first and last post)\n\
/custom_batch - link to chosen posts, finish with /done\n\
/special - chosen posts plus a message, finish with /done\n\
/cancel - drop the link being built\n\n\
<b>Users</b>\n\
/broadcast - reply to a message to send it to every user\n\
/progress - broadcast progress\n\
/users - number of known users\n\n\
Forward posts from the archive channel or send their links. Any other message \
you send is stored in the archive and answered with its link.";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn collect_mode(cmd: &str) -> Option<CollectMode> {
    match cmd {
        "genlink" => Some(CollectMode::Single),
        "batch" => Some(CollectMode::Range),
        "custom_batch" | "custombatch" => Some(CollectMode::List),
        "special" => Some(CollectMode::Annotated),
        _ => None,
    }
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = sender(&msg) else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat = ChatId(msg.chat.id.0);
    let (cmd, arg) = parse_command(text);

    if cmd == "start" {
        deliver::handle_start(&bot, &state, user, chat, &arg).await;
        return Ok(());
    }

    if !is_operator(Some(user), &state.cfg.operator_ids) {
        send_html(&bot, chat, &escape_html(&state.cfg.start_message)).await;
        return Ok(());
    }

    if let Some(mode) = collect_mode(&cmd) {
        match state.registry.start(user, mode).await {
            Ok(started) => {
                if let Some(replaced) = started.replaced {
                    send_html(
                        &bot,
                        chat,
                        &format!("Discarded the unfinished {}.", replaced.label()),
                    )
                    .await;
                }
                report_step(&bot, &state, chat, mode, Ok(started.step)).await;
            }
            Err(e) => send_html(&bot, chat, &escape_html(&e.operator_message())).await,
        }
        return Ok(());
    }

    match cmd.as_str() {
        "help" => send_html(&bot, chat, OPERATOR_HELP).await,

        "done" => {
            let mode = state.registry.active_mode(user).await;
            let result = state.registry.done(user).await;
            report_step(&bot, &state, chat, mode.unwrap_or(CollectMode::List), result).await;
        }

        "cancel" => {
            let mode = state.registry.active_mode(user).await;
            let result = state.registry.cancel(user).await;
            if let (Ok(Step::Cancelled), Some(mode)) = (&result, mode) {
                tracing::info!(operator = user.0, mode = mode.label(), "session cancelled");
            }
            report_step(&bot, &state, chat, mode.unwrap_or(CollectMode::List), result).await;
        }

        "broadcast" => broadcast::start_broadcast(&bot, &state, user, &msg).await,

        "progress" => broadcast::show_progress(&bot, &state, user, chat).await,

        "users" => {
            let n = state.store.users().len();
            send_html(&bot, chat, &format!("<b>{n}</b> users.")).await;
        }

        _ => {
            let reply = format!("Unknown command: /{}. See /help.", escape_html(&cmd));
            send_html(&bot, chat, &reply).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_bot_suffix_and_payload() {
        assert_eq!(
            parse_command("/start@vault_bot Z2V0LTEy"),
            ("start".to_string(), "Z2V0LTEy".to_string())
        );
        assert_eq!(parse_command("/Done"), ("done".to_string(), String::new()));
    }

    #[test]
    fn maps_collection_commands() {
        assert_eq!(collect_mode("genlink"), Some(CollectMode::Single));
        assert_eq!(collect_mode("batch"), Some(CollectMode::Range));
        assert_eq!(collect_mode("custom_batch"), Some(CollectMode::List));
        assert_eq!(collect_mode("special"), Some(CollectMode::Annotated));
        assert_eq!(collect_mode("broadcast"), None);
    }
}
