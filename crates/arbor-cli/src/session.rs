//! The interactive read/answer loop.

use std::io::Write;

use anyhow::Result;
use console::style;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use arbor::models::part::Part;
use arbor::providers::base::Agent;
use arbor::tools::runner::ToolRunner;
use arbor::tools::ToolContext;
use arbor::turn::run_turn;

pub async fn run_interactive(
    agent: &mut dyn Agent,
    tools: &ToolRunner,
    cx: &ToolContext,
) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("arbor> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }
        let _ = editor.add_history_entry(input);

        if let Err(err) = run_one_turn(agent, tools, cx, input).await {
            eprintln!("{} {err}", style("error:").red());
        }
        println!();
    }
    Ok(())
}

pub async fn run_once(
    agent: &mut dyn Agent,
    tools: &ToolRunner,
    cx: &ToolContext,
    prompt: &str,
) -> Result<()> {
    run_one_turn(agent, tools, cx, prompt).await?;
    println!();
    Ok(())
}

async fn run_one_turn(
    agent: &mut dyn Agent,
    tools: &ToolRunner,
    cx: &ToolContext,
    input: &str,
) -> Result<()> {
    run_turn(agent, tools, cx, vec![Part::text(input)], render_part).await?;
    Ok(())
}

/// Streams parts to the terminal as they arrive. Text fragments print
/// inline; thoughts and tool calls are dimmed so the answer stands out.
fn render_part(part: &Part) {
    match part {
        Part::Text { text, thought: true, .. } => {
            print!("{}", style(text).dim().italic());
        }
        Part::Text { text, .. } => {
            print!("{text}");
        }
        Part::FunctionCall(call) => {
            let args = serde_json::Value::Object(call.args.clone());
            println!();
            println!("{}", style(format!("⚙ {}({})", call.name, args)).dim());
        }
        // Responses and attachments are not rendered; the model's next
        // message reflects them.
        _ => {}
    }
    let _ = std::io::stdout().flush();
}
