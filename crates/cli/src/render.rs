//! Plain-text rendering of posts and reply trees

use std::fmt::Write;
use threadline_domain::Post;
use threadline_domain::usecases::{InteractionStateStore, ReplyForest};

const SUMMARY_CHARS: usize = 72;

/// One line per reply, indented by depth, in display order
pub fn forest_text(forest: &ReplyForest, ledger: Option<&InteractionStateStore>) -> String {
    if forest.is_empty() {
        return "(no replies)\n".to_string();
    }

    let mut out = String::new();
    for node in forest.walk() {
        let reply = &node.reply;
        let marker = if reply.is_solution { "✓" } else { "•" };

        let mut stats = format!("+{} -{}", reply.upvotes, reply.downvotes);
        for (kind, users) in &reply.reactions {
            if !users.is_empty() {
                let _ = write!(stats, " {}:{}", kind, users.len());
            }
        }
        if !reply.media.is_empty() {
            let _ = write!(stats, " media:{}", reply.media.len());
        }

        let mut mine = Vec::new();
        if let Some(ledger) = ledger {
            if let Some(vote) = ledger.vote(&reply.id) {
                mine.push(vote.to_string());
            }
            if let Some(reaction) = ledger.reaction(&reply.id) {
                mine.push(reaction.to_string());
            }
        }
        let mine = if mine.is_empty() {
            String::new()
        } else {
            format!(" (you: {})", mine.join(", "))
        };

        let _ = writeln!(
            out,
            "{}{} {}: {} [{}]{}",
            "  ".repeat(node.depth),
            marker,
            reply.author_name,
            summarize(&reply.body),
            stats,
            mine
        );
    }
    out
}

/// Header block for a post
pub fn post_text(post: &Post, ledger: Option<&InteractionStateStore>) -> String {
    let status = if post.resolved() { "resolved" } else { "open" };
    let mut out = format!(
        "{} (by {})\n{} likes, {} replies, {}\n",
        post.title, post.author_name, post.like_count, post.reply_count, status
    );

    if let Some(ledger) = ledger {
        let mut mine = Vec::new();
        if ledger.is_liked(&post.id) {
            mine.push("liked");
        }
        if ledger.is_bookmarked(&post.id) {
            mine.push("bookmarked");
        }
        if !mine.is_empty() {
            let _ = writeln!(out, "you: {}", mine.join(", "));
        }
    }
    out
}

fn summarize(body: &str) -> String {
    let line = body.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= SUMMARY_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(SUMMARY_CHARS - 1).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use threadline_domain::{PostId, ReactionKind, Reply, ReplyId, UserId, VoteKind};
    use time::OffsetDateTime;

    fn reply(id: &str, parent: Option<&str>, body: &str) -> Reply {
        Reply {
            id: ReplyId::from(id),
            post_id: PostId::from("p1"),
            parent_reply_id: parent.map(ReplyId::from),
            author_id: UserId::from("u1"),
            author_name: "Ada".to_string(),
            body: body.to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            upvotes: 0,
            upvoted_by: BTreeSet::new(),
            downvotes: 0,
            downvoted_by: BTreeSet::new(),
            reactions: Default::default(),
            is_solution: false,
            media: vec![],
            mentions: vec![],
        }
    }

    #[test]
    fn test_children_are_indented() {
        let mut answer = reply("a", None, "Use a lock");
        answer.is_solution = true;
        answer.upvotes = 2;
        let forest = ReplyForest::build(vec![answer, reply("b", Some("a"), "Thanks!")]);

        let text = forest_text(&forest, None);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("✓ Ada: Use a lock [+2 -0]"));
        assert!(lines[1].starts_with("  • Ada: Thanks!"));
    }

    #[test]
    fn test_viewer_choices_shown() {
        let forest = ReplyForest::build(vec![reply("a", None, "hi")]);
        let mut ledger = InteractionStateStore::new(UserId::from("me"));
        ledger.set_vote(&ReplyId::from("a"), Some(VoteKind::Up));
        ledger.set_reaction(&ReplyId::from("a"), Some(ReactionKind::from("heart")));

        let text = forest_text(&forest, Some(&ledger));
        assert!(text.contains("(you: up, heart)"));
    }

    #[test]
    fn test_long_body_is_summarized() {
        let body = format!("{}\nsecond line", "x".repeat(100));
        let summary = summarize(&body);
        assert_eq!(summary.chars().count(), SUMMARY_CHARS);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn test_empty_forest() {
        assert_eq!(forest_text(&ReplyForest::default(), None), "(no replies)\n");
    }
}
