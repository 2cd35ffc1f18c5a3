//! StreamClassifier - 雑多な stderr 行の任意の付け替え
//!
//! 情報メッセージを stderr に書くツールがある。有効にすると、info トークン
//! （例: `INFO`, `WARN`）を含み error トークンを含まない stderr 行は stdout として
//! *配信* される。1 行に両方ある場合は error トークンが優先。
//!
//! 永続化には影響しない。行は読み取ったストリームのログファイルに書かれる。

use crate::domain::StreamKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamClassifier {
    info_tokens: Vec<String>,
    error_tokens: Vec<String>,
}

impl StreamClassifier {
    pub fn new(info_tokens: Vec<String>, error_tokens: Vec<String>) -> Self {
        Self {
            info_tokens,
            error_tokens,
        }
    }

    /// `origin` から読んだ行を配信するときのストリーム種別
    pub fn classify(&self, origin: StreamKind, text: &str) -> StreamKind {
        if origin != StreamKind::Stderr {
            return origin;
        }
        let has = |tokens: &[String]| tokens.iter().any(|t| text.contains(t.as_str()));
        if has(&self.error_tokens) || !has(&self.info_tokens) {
            StreamKind::Stderr
        } else {
            StreamKind::Stdout
        }
    }
}

impl Default for StreamClassifier {
    fn default() -> Self {
        Self::new(
            vec!["INFO".into(), "WARN".into()],
            vec!["ERROR".into(), "Traceback".into(), "Exception".into()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain_error(StreamKind::Stderr, "segfault", StreamKind::Stderr)]
    #[case::info(StreamKind::Stderr, "[INFO] iteration 3", StreamKind::Stdout)]
    #[case::warn(StreamKind::Stderr, "WARN: slow trial", StreamKind::Stdout)]
    #[case::both(StreamKind::Stderr, "INFO ERROR: worker died", StreamKind::Stderr)]
    #[case::traceback(StreamKind::Stderr, "WARN Traceback (most recent call last)", StreamKind::Stderr)]
    #[case::stdout_untouched(StreamKind::Stdout, "ERROR in stdout", StreamKind::Stdout)]
    #[case::case_sensitive(StreamKind::Stderr, "info: lowercase", StreamKind::Stderr)]
    fn default_rules(#[case] origin: StreamKind, #[case] text: &str, #[case] expected: StreamKind) {
        assert_eq!(StreamClassifier::default().classify(origin, text), expected);
    }

    #[test]
    fn custom_tokens() {
        let c = StreamClassifier::new(vec!["progress".into()], vec![]);
        assert_eq!(c.classify(StreamKind::Stderr, "progress 40%"), StreamKind::Stdout);
        assert_eq!(c.classify(StreamKind::Stderr, "INFO"), StreamKind::Stderr);
    }
}
