use {
    anyhow::bail,
    clap::Subcommand,
    courier_common::{time::format_rfc3339, types::ConversationPolicy},
    courier_config::CourierConfig,
    courier_store::{Conversation, ConversationStore},
};

use crate::db_commands::open_store;

#[derive(Subcommand)]
pub enum ConversationAction {
    /// List registered conversations (with `--all`, every one seen).
    List {
        #[arg(long)]
        all: bool,
    },
    /// Show one conversation, including its cursor and policy.
    Show { id: String },
    /// Allow a conversation to be dispatched to the agent.
    Register {
        id: String,
        /// Display name; defaults to the name reported by the transport.
        #[arg(long)]
        name: Option<String>,
        /// Only dispatch once a pending message mentions the assistant.
        #[arg(long)]
        requires_trigger: bool,
        /// Keep messages from other automated senders in the context.
        #[arg(long)]
        include_bots: bool,
        /// Keep the bridge's own replies in the context.
        #[arg(long)]
        include_self: bool,
    },
    /// Stop dispatching a conversation. Stored events are kept.
    Deregister { id: String },
}

pub async fn handle_conversations(
    config: &CourierConfig,
    action: ConversationAction,
) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    match action {
        ConversationAction::List { all } => {
            let conversations = store.list_conversations(!all).await?;
            if conversations.is_empty() {
                println!("No conversations.");
            }
            for conversation in &conversations {
                println!("{}", list_line(conversation));
            }
        },
        ConversationAction::Show { id } => {
            let Some(conversation) = store.get_conversation(&id).await? else {
                bail!("conversation {id} has never been seen");
            };
            print!("{}", details(&conversation));
        },
        ConversationAction::Register {
            id,
            name,
            requires_trigger,
            include_bots,
            include_self,
        } => {
            let policy = policy_from_flags(
                &config.dispatch.default_policy,
                requires_trigger,
                include_bots,
                include_self,
            );
            store.register(&id, name.as_deref(), &policy).await?;
            println!("Registered {id}");
        },
        ConversationAction::Deregister { id } => {
            if store.deregister(&id).await? {
                println!("Deregistered {id}");
            } else {
                bail!("conversation {id} is not registered");
            }
        },
    }
    store.pool().close().await;
    Ok(())
}

/// Flags only ever switch options on; the configured default supplies the rest.
fn policy_from_flags(
    default: &ConversationPolicy,
    requires_trigger: bool,
    include_bots: bool,
    include_self: bool,
) -> ConversationPolicy {
    let mut policy = default.clone();
    policy.requires_trigger |= requires_trigger;
    policy.echo.include_bots |= include_bots;
    policy.echo.include_self |= include_self;
    policy
}

fn list_line(conversation: &Conversation) -> String {
    let marker = if conversation.registered { "*" } else { " " };
    let kind = if conversation.is_group { "group" } else { "direct" };
    format!(
        "{marker} {:<40} {:<6} {}",
        conversation.conversation_id,
        kind,
        conversation.name.as_deref().unwrap_or("-"),
    )
}

fn details(conversation: &Conversation) -> String {
    let cursor = if conversation.cursor_timestamp == 0 {
        "none".to_string()
    } else {
        format_rfc3339(conversation.cursor_timestamp)
    };
    let policy = &conversation.policy;
    format!(
        "id:               {}\n\
         name:             {}\n\
         registered:       {}\n\
         group:            {}\n\
         cursor:           {cursor}\n\
         requires trigger: {}\n\
         include self:     {}\n\
         include bots:     {}\n\
         last seen:        {}\n",
        conversation.conversation_id,
        conversation.name.as_deref().unwrap_or("-"),
        conversation.registered,
        conversation.is_group,
        policy.requires_trigger,
        policy.echo.include_self,
        policy.echo.include_bots,
        format_rfc3339(conversation.last_seen_at),
    )
}
