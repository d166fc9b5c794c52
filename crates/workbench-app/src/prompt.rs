use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use workbench_protocol::{ConfirmRequest, ConfirmationPrompt, WorkbenchError, WorkbenchResult};

/// Asks on stderr and reads the answer from stdin. With `assume_default`
/// every prompt resolves to its default option without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt {
    assume_default: bool,
}

impl TerminalPrompt {
    pub fn new(assume_default: bool) -> Self {
        Self { assume_default }
    }
}

#[async_trait]
impl ConfirmationPrompt for TerminalPrompt {
    async fn confirm(&self, request: ConfirmRequest) -> WorkbenchResult<usize> {
        if self.assume_default {
            return Ok(request.default_option);
        }

        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(render(&request).as_bytes())
            .await
            .map_err(|error| WorkbenchError::io("failed to write prompt", error))?;
        stderr
            .flush()
            .await
            .map_err(|error| WorkbenchError::io("failed to write prompt", error))?;

        let mut answer = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut answer)
            .await
            .map_err(|error| WorkbenchError::io("failed to read answer", error))?;
        if read == 0 {
            return Ok(request.cancel_option);
        }
        parse_answer(&request, &answer)
    }
}

fn render(request: &ConfirmRequest) -> String {
    let mut text = format!("{}\n{}\n", request.title, request.message);
    for (index, option) in request.options.iter().enumerate() {
        let marker = if index == request.default_option { "*" } else { " " };
        text.push_str(&format!("{marker} {}) {option}\n", index + 1));
    }
    text.push_str("> ");
    text
}

/// Options are numbered from 1; an empty answer picks the default.
fn parse_answer(request: &ConfirmRequest, answer: &str) -> WorkbenchResult<usize> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(request.default_option);
    }
    if let Ok(number) = answer.parse::<usize>() {
        if (1..=request.options.len()).contains(&number) {
            return Ok(number - 1);
        }
    }
    request
        .options
        .iter()
        .position(|option| option.eq_ignore_ascii_case(answer))
        .ok_or_else(|| WorkbenchError::InvalidInput(format!("unknown answer {answer:?}")))
}
