// パス: src/repl/accumulator.rs
// 役割: Line accumulation state machine deciding when a statement is complete
// 意図: Track quotes, comments and bracket depth so multi-line input reaches the classifier whole
// 関連ファイル: src/repl/line_editor.rs, src/repl/classify.rs, src/repl/cmd.rs
//! 複数行入力の蓄積。
//!
//! - 行を追加するたびにバッファ全体を先頭から走査し直す。ブロックコメントや
//!   引用符の状態が行をまたぐため、差分走査では正しく復元できない。
//! - 引用符はエスケープを解釈しない単純なトグル。`""` は閉じて開き直すのと区別しない。
//! - 継続条件: 直前の行が空でなく、かつ括弧が閉じていないか行末が `=` / `=>`。
//!   空行は括弧の深さに関係なく文を打ち切る。

use std::io;

use super::line_editor::{ReadResult, ReplLineSource};

/// 対話時の最初の行のプロンプト。
pub const PROMPT: &str = "> ";
/// 継続行のプロンプト。
pub const CONTINUATION_PROMPT: &str = "";

/// バッファ全体を走査した結果。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanState {
    pub bracket_depth: i32,
    pub in_double_quote: bool,
    pub in_single_quote: bool,
    pub in_line_comment: bool,
    pub in_block_comment: bool,
    /// 直前に処理した文字。コメント記号の境界ではリセットされる。
    pub last_char: Option<char>,
    /// 空白とコメント以外の文字数。
    pub non_trivial_char_count: usize,
}

impl ScanState {
    fn in_comment(&self) -> bool {
        self.in_line_comment || self.in_block_comment
    }

    fn in_quote(&self) -> bool {
        self.in_double_quote || self.in_single_quote
    }

    fn step(&mut self, ch: char) {
        let prev = self.last_char;
        self.last_char = Some(ch);

        if self.in_line_comment {
            if ch == '\n' {
                self.in_line_comment = false;
            }
            return;
        }
        if self.in_block_comment {
            if prev == Some('*') && ch == '/' {
                self.in_block_comment = false;
                // `*/*` を新しいコメントの開始と読まない
                self.last_char = None;
            }
            return;
        }

        match ch {
            '"' if !self.in_single_quote => self.in_double_quote = !self.in_double_quote,
            '\'' if !self.in_double_quote => self.in_single_quote = !self.in_single_quote,
            '/' if !self.in_quote() && prev == Some('/') => {
                self.in_line_comment = true;
                // 1 文字目の `/` は有効文字として数え済み
                self.non_trivial_char_count = self.non_trivial_char_count.saturating_sub(1);
                return;
            }
            '*' if !self.in_quote() && prev == Some('/') => {
                self.in_block_comment = true;
                self.non_trivial_char_count = self.non_trivial_char_count.saturating_sub(1);
                // `/*/` を開始直後の終了と読まない
                self.last_char = None;
                return;
            }
            '(' | '{' | '[' if !self.in_quote() => self.bracket_depth += 1,
            ')' | '}' | ']' if !self.in_quote() => self.bracket_depth -= 1,
            _ => {}
        }
        if !ch.is_whitespace() && !self.in_comment() {
            self.non_trivial_char_count += 1;
        }
    }
}

/// 文字列全体を先頭から走査する。
pub fn scan(text: &str) -> ScanState {
    let mut state = ScanState::default();
    for ch in text.chars() {
        state.step(ch);
    }
    state
}

/// 行からコメント部分を除いたテキスト。`state` は行頭時点の走査状態。
fn code_part(mut state: ScanState, line: &str) -> String {
    let mut code = String::new();
    for ch in line.chars() {
        let was_comment = state.in_comment();
        state.step(ch);
        if state.in_comment() {
            if !was_comment {
                // 直前の `/` はコメント記号の 1 文字目
                code.pop();
            }
            continue;
        }
        if !was_comment {
            code.push(ch);
        }
    }
    code
}

/// コメントを除いた行末が `=` または `=>` で終わるか（後続の空白は無視）。
fn ends_with_assignment(line_start: &ScanState, line: &str) -> bool {
    let code = code_part(line_start.clone(), line);
    let trimmed = code.trim_end();
    trimmed.ends_with('=') || trimmed.ends_with("=>")
}

/// 1 文分の行を溜めるバッファ。
#[derive(Debug, Default)]
pub struct LineAccumulator {
    buffer: String,
    state: ScanState,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 行を追加し、さらに行が必要なら `true` を返す。
    pub fn push_line(&mut self, line: &str) -> bool {
        let line_start = scan(&self.buffer);
        self.buffer.push_str(line);
        self.buffer.push('\n');
        self.state = scan(&self.buffer);
        let blank = line.trim().is_empty();
        !blank && (self.state.bracket_depth != 0 || ends_with_assignment(&line_start, line))
    }

    /// 文の途中（1 行以上溜まっている）かどうか。
    pub fn is_continuing(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// 溜めた文を取り出して空に戻す。
    pub fn take(&mut self) -> String {
        self.state = ScanState::default();
        std::mem::take(&mut self.buffer)
    }
}

/// 入力元から 1 文を読む。入力が尽きて途中の文もなければ `None`。
///
/// 空白とコメントだけの文は捨てて読み直す。対話時は文の先頭行でだけ
/// `PROMPT` を表示する。
pub fn read_statement<S: ReplLineSource + ?Sized>(source: &mut S) -> io::Result<Option<String>> {
    let mut acc = LineAccumulator::new();
    loop {
        let prompt = if acc.is_continuing() {
            CONTINUATION_PROMPT
        } else {
            PROMPT
        };
        match source.read_line(prompt)? {
            ReadResult::Line(line) => {
                if acc.push_line(&line) {
                    continue;
                }
                if acc.state().non_trivial_char_count == 0 {
                    acc.take();
                    continue;
                }
                return Ok(Some(acc.take()));
            }
            ReadResult::Eof => {
                if acc.state().non_trivial_char_count > 0 {
                    return Ok(Some(acc.take()));
                }
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{read_statement, scan, LineAccumulator, CONTINUATION_PROMPT, PROMPT};
    use crate::repl::line_editor::{ReadResult, ReplLineSource, ScriptSource};
    use std::io;

    #[test]
    /// 括弧の釣り合った 1 行はそのまま 1 文になる。
    fn balanced_single_line_completes() {
        let mut acc = LineAccumulator::new();
        assert!(!acc.push_line("1 + (2 * 3)"));
        assert_eq!(acc.take(), "1 + (2 * 3)\n");
    }

    #[test]
    fn unbalanced_brackets_request_more_lines() {
        let mut acc = LineAccumulator::new();
        assert!(acc.push_line("Set(x,"));
        assert!(!acc.push_line("1+1)"));
        assert_eq!(acc.take(), "Set(x,\n1+1)\n");
    }

    #[test]
    /// 空行は括弧の深さに関係なく文を打ち切る。
    fn blank_line_aborts_continuation() {
        let mut acc = LineAccumulator::new();
        assert!(acc.push_line("Table({a: 1},"));
        assert!(!acc.push_line("   "));
        assert_eq!(acc.state().bracket_depth, 1);
    }

    #[test]
    fn trailing_equals_or_arrow_continues() {
        let mut acc = LineAccumulator::new();
        assert!(acc.push_line("F = "));
        assert!(!acc.push_line("m * a"));
        let mut acc = LineAccumulator::new();
        assert!(acc.push_line("G(x: Number): Number =>  "));
    }

    #[test]
    /// 行末の `=` がコメントの中にあれば継続しない。
    fn trailing_equals_inside_comment_does_not_continue() {
        let mut acc = LineAccumulator::new();
        assert!(!acc.push_line("1 + 1 // total ="));
        let mut acc = LineAccumulator::new();
        assert!(!acc.push_line("2 /* => */"));
        let mut acc = LineAccumulator::new();
        assert!(acc.push_line("F = // next line"));
        assert!(!acc.push_line("3"));
        let mut acc = LineAccumulator::new();
        assert!(acc.push_line("\"a // b\" & x ="));
    }

    #[test]
    /// 引用符とコメント内の括弧は数えない。
    fn brackets_inside_quotes_and_comments_are_ignored() {
        assert_eq!(scan("\"(\" & '[' // (\n").bracket_depth, 0);
        assert_eq!(scan("/* ( */ 1").bracket_depth, 0);
        assert_eq!(scan("( /* ) */").bracket_depth, 1);
    }

    #[test]
    fn comment_state_spans_lines() {
        let s = scan("1 /* open\nstill");
        assert!(s.in_block_comment);
        let s = scan("// c\n2");
        assert!(!s.in_line_comment);
        assert_eq!(s.non_trivial_char_count, 1);
    }

    #[test]
    /// コメントだけの入力は有効文字数 0 になる。
    fn comment_only_input_has_no_useful_chars() {
        assert_eq!(scan("  // hello (\n").non_trivial_char_count, 0);
        assert_eq!(scan("/* a */ /* b */\n").non_trivial_char_count, 0);
        assert_eq!(scan("/*/ still comment */").non_trivial_char_count, 0);
        assert_eq!(scan("x // y").non_trivial_char_count, 1);
    }

    #[test]
    fn quotes_are_plain_toggles() {
        let s = scan("\"a\"\"b\"");
        assert!(!s.in_double_quote);
        assert!(scan("\"it's").in_double_quote);
        assert!(!scan("\"it's").in_single_quote);
    }

    struct RecordingSource {
        inner: ScriptSource,
        prompts: Vec<String>,
    }

    impl ReplLineSource for RecordingSource {
        fn read_line(&mut self, prompt: &str) -> io::Result<ReadResult> {
            self.prompts.push(prompt.to_string());
            self.inner.read_line(prompt)
        }

        fn is_interactive(&self) -> bool {
            true
        }
    }

    #[test]
    /// コメントだけの文を読み飛ばし、継続行ではプロンプトを変える。
    fn read_statement_skips_trivia_and_switches_prompt() {
        let mut src = RecordingSource {
            inner: ScriptSource::new("// note\n\nSet(x,\n2)\n"),
            prompts: Vec::new(),
        };
        let stmt = read_statement(&mut src).unwrap();
        assert_eq!(stmt.as_deref(), Some("Set(x,\n2)\n"));
        assert_eq!(src.prompts, vec![PROMPT, PROMPT, PROMPT, CONTINUATION_PROMPT]);
        assert_eq!(read_statement(&mut src).unwrap(), None);
    }

    #[test]
    fn eof_flushes_partial_statement() {
        let mut src = ScriptSource::new("Sum(1,\n2");
        assert_eq!(read_statement(&mut src).unwrap().as_deref(), Some("Sum(1,\n2\n"));
        assert_eq!(read_statement(&mut src).unwrap(), None);
    }
}
