//! Telegram MarkdownV2 helpers.
//!
//! The wrappers do not escape their input; pass text through [`escape`] first.

/// `*text*`
pub fn bold(text: &str) -> String {
    format!("*{text}*")
}

/// `_text_`
pub fn italic(text: &str) -> String {
    format!("_{text}_")
}

/// `` `text` ``
pub fn inline_code(text: &str) -> String {
    format!("`{text}`")
}

/// `[text](link)`
pub fn inline_link(text: &str, link: &str) -> String {
    format!("[{text}]({link})")
}

/// Escape every MarkdownV2 control character so `text` renders literally.
pub fn escape(text: &str) -> String {
    teloxide::utils::markdown::escape(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrappers() {
        assert_eq!(bold("hi"), "*hi*");
        assert_eq!(italic("hi"), "_hi_");
        assert_eq!(inline_code("x = 1"), "`x = 1`");
        assert_eq!(
            inline_link("watch", "https://youtu.be/abc"),
            "[watch](https://youtu.be/abc)"
        );
    }

    #[test]
    fn escape_markup_symbols() {
        assert_eq!(escape("a_b*c.d!"), r"a\_b\*c\.d\!");
        assert_eq!(escape("[x](y)"), r"\[x\]\(y\)");
        assert_eq!(escape("plain text"), "plain text");
    }

    #[test]
    fn escaped_text_composes_with_wrappers() {
        assert_eq!(bold(&escape("v1.0")), r"*v1\.0*");
    }
}
