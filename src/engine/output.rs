//! エンジン出力ログからの成果物ファイル名抽出
//!
//! # 責務
//!
//! ワークフローエンジンは構造化された結果を返さないため、人間向けログの中から
//! `Outputs:` マーカーに続く1行を探し、クエリ文字列風のトークン
//! (`filename=<name>&...`) からファイル名を取り出します。
//!
//! ```text
//! Prompt executed in 3.21 seconds
//! Outputs:
//! filename=ComfyUI_00001_.png&subfolder=&type=output
//! ```
//!
//! 厳密なパーサーではありません。不正な入力でも失敗せず、見つかった分だけを返します。

/// 成果物一覧の直前に出力されるマーカー
const OUTPUTS_MARKER: &str = "Outputs:";

/// ファイル名トークンのキー
const FILENAME_KEY: &str = "filename=";

/// 出力ログから成果物のファイル名を抽出する
///
/// # 処理フロー
///
/// 1. `\r` を `\n` に正規化
/// 2. 最初の `Outputs:` マーカーを探す（無ければ `None`）
/// 3. マーカー以降で最初の空でない行だけを対象にする
/// 4. その行に含まれる `filename=` の値を `&` または行末まで取り出す
///
/// 行と各値の前後の空白は取り除きます。空白だけの値は無視されます。
///
/// # 戻り値
///
/// - `Some(names)`: マーカーが見つかった場合。出現順、重複はそのまま
/// - `None`: マーカーが見つからない場合
///
/// # 例
///
/// ```rust
/// use comfy_ci_runner::engine::output::parse_output_filenames;
///
/// let log = "Outputs:\nfilename=a.png&type=output&filename=b.png\n";
/// assert_eq!(
///     parse_output_filenames(log),
///     Some(vec!["a.png".to_string(), "b.png".to_string()])
/// );
/// assert_eq!(parse_output_filenames("no marker here"), None);
/// ```
pub fn parse_output_filenames(raw_stdout: &str) -> Option<Vec<String>> {
    let normalized = raw_stdout.replace('\r', "\n");
    let (_, after_marker) = normalized.split_once(OUTPUTS_MARKER)?;

    let line = after_marker
        .split('\n')
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    Some(extract_filenames(line))
}

fn extract_filenames(line: &str) -> Vec<String> {
    line.match_indices(FILENAME_KEY)
        .filter_map(|(pos, _)| {
            let rest = &line[pos + FILENAME_KEY.len()..];
            let value = rest.split('&').next().unwrap_or_default().trim();
            (!value.is_empty()).then(|| value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Option<Vec<String>> {
        Some(values.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_only_first_line_after_marker_is_read() {
        let log = "Outputs:\nfilename=a.png&x=1\nfilename=b.png&y=2";
        assert_eq!(parse_output_filenames(log), names(&["a.png"]));
    }

    #[test]
    fn test_multiple_tokens_on_one_line() {
        let log = "Outputs:\nfilename=a.png&x=1&filename=b.png&y=2";
        assert_eq!(parse_output_filenames(log), names(&["a.png", "b.png"]));
    }

    #[test]
    fn test_missing_marker_is_not_found() {
        assert_eq!(parse_output_filenames("Prompt executed in 1.2 seconds\n"), None);
        assert_eq!(parse_output_filenames(""), None);
    }

    #[test]
    fn test_carriage_returns_are_normalized() {
        let log = "progress 50%\rprogress 100%\rOutputs:\r\r\nfilename=c.png&type=output\r\n";
        assert_eq!(parse_output_filenames(log), names(&["c.png"]));
    }

    #[test]
    fn test_blank_lines_after_marker_are_skipped() {
        let log = "Outputs:\n\n   \nfilename=d.webp\n";
        assert_eq!(parse_output_filenames(log), names(&["d.webp"]));
    }

    #[test]
    fn test_first_marker_wins() {
        let log = "Outputs:\nfilename=first.png\nOutputs:\nfilename=second.png\n";
        assert_eq!(parse_output_filenames(log), names(&["first.png"]));
    }

    #[test]
    fn test_duplicates_are_preserved_in_order() {
        let log = "Outputs:\nfilename=z.png&filename=a.png&filename=z.png";
        assert_eq!(parse_output_filenames(log), names(&["z.png", "a.png", "z.png"]));
    }

    #[test]
    fn test_marker_without_tokens_yields_empty_list() {
        assert_eq!(parse_output_filenames("Outputs:\nnothing useful\n"), Some(vec![]));
        assert_eq!(parse_output_filenames("Outputs:"), Some(vec![]));
    }

    #[test]
    fn test_malformed_tokens_do_not_fail() {
        let log = "Outputs:\nfilename=&filename=&&filename=ok.png&filename=";
        assert_eq!(parse_output_filenames(log), names(&["ok.png"]));
    }

    #[test]
    fn test_url_style_line() {
        let log = "Outputs:\nhttp://127.0.0.1:8188/view?filename=ComfyUI_00001_.png&subfolder=&type=output\n";
        assert_eq!(parse_output_filenames(log), names(&["ComfyUI_00001_.png"]));
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let log = "Outputs:\n   filename= a.png &filename=   &type=output  \n";
        assert_eq!(parse_output_filenames(log), names(&["a.png"]));
    }
}
