use std::io::{self, Write};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal
};

use crate::manager::task_manager::TaskManager;

pub fn run_cli(manager: &TaskManager) -> io::Result<()> {
    println!("Shell tunnel console started. Enter a command or 'exit' to quit.");
    terminal::enable_raw_mode()?;
    let result = console_loop(manager);
    terminal::disable_raw_mode()?;
    result
}

fn console_loop(manager: &TaskManager) -> io::Result<()> {
    let mut commands_history: Vec<String> = Vec::new();
    let mut history_index = 0;
    loop {
        let input = read_line(&commands_history, &mut history_index)?;
        if !input.trim().is_empty() {
            commands_history.push(input.clone());
        }
        history_index = commands_history.len();
        if !handle_command(manager, &input) {
            return Ok(());
        }
    }
}

fn read_line(commands_history: &[String], history_index: &mut usize) -> io::Result<String> {
    print!("\r>>> ");
    io::stdout().flush()?;

    let mut input = String::new();
    loop {
        let Event::Key(key_event) = event::read()? else {
            continue;
        };
        if key_event.kind == KeyEventKind::Release {
            continue;
        }
        match key_event.code {
            KeyCode::Enter => {
                println!();
                return Ok(input);
            }
            KeyCode::Up => {
                if *history_index > 0 {
                    *history_index -= 1;
                }
                if let Some(command) = commands_history.get(*history_index) {
                    input = command.clone();
                    redraw(&input)?;
                }
            }
            KeyCode::Down => {
                if *history_index < commands_history.len() {
                    *history_index += 1;
                }
                input = commands_history
                    .get(*history_index)
                    .cloned()
                    .unwrap_or_default();
                redraw(&input)?;
            }
            KeyCode::Char(c) => {
                input.push(c);
                print!("{}", c);
                io::stdout().flush()?;
            }
            KeyCode::Backspace => {
                input.pop();
                redraw(&input)?;
            }
            _ => {}
        }
    }
}

/// Returns `false` when the console should exit.
fn handle_command(manager: &TaskManager, input: &str) -> bool {
    let mut args = input.split_whitespace();
    match args.next() {
        Some("create") => {
            let mut timeout = 0;
            let mut words: Vec<&str> = args.collect();
            if words.first() == Some(&"-t") && words.len() > 1 {
                match words[1].parse::<u64>() {
                    Ok(secs) => timeout = secs,
                    Err(_) => {
                        println!("\rInvalid timeout.");
                        return true;
                    }
                }
                words.drain(..2);
            }
            if words.is_empty() {
                println!("\rScript to execute must be specified.");
            } else {
                // `;;` separates script lines on the console.
                let script = words.join(" ").replace(";;", "\n");
                let task_id = manager.create_task(script, timeout);
                println!("\rCreated task with ID: {}", task_id);
                println!("\rUse `run {}` to start it", task_id);
            }
        }
        Some("run") => with_id(args.next(), |id| {
            if manager.run_task(id) {
                println!("\rSent run signal for task {}", id);
            } else {
                println!("\rTask {} not found", id);
            }
        }),
        Some("stop") => with_id(args.next(), |id| match manager.stop_task(id) {
            Some(Ok(())) => println!("\rSent kill signal for task {}", id),
            Some(Err(e)) => println!("\rTask {} not stopped: {}", id, e),
            None => println!("\rTask {} not found", id),
        }),
        Some("status") => with_id(args.next(), |id| match manager.get_task_state(id) {
            Some(state) => println!("\rTask {} state: {}", id, state),
            None => println!("\rTask {} not found", id),
        }),
        Some("output") => with_id(args.next(), |id| match manager.get_task_output(id) {
            Some(Ok(output)) => {
                for line in output.lines() {
                    println!("\r{}", line);
                }
            }
            Some(Err(e)) => println!("\rTask {} has no output: {}", id, e),
            None => println!("\rTask {} not found", id),
        }),
        Some("remove") => with_id(args.next(), |id| match manager.remove_task(id) {
            Some(removal) if removal.is_clean() => println!("\rRemoved task {}", id),
            Some(_) => println!("\rRemoved task {} with errors, see log", id),
            None => println!("\rTask {} not found or still running", id),
        }),
        Some("list") => {
            let tasks = manager.get_all_tasks();
            if tasks.is_empty() {
                println!("\rNo tasks");
            } else {
                println!("\r{:<20} {:<16} {:<8} {:<8}", "ID", "State", "Timeout", "PID");
                println!("\r{}", "-".repeat(56));
                for task in tasks {
                    let pid = if task.pid == 0 { "NONE".to_string() } else { task.pid.to_string() };
                    println!(
                        "\r{:<20} {:<16} {:<8} {:<8}",
                        task.idx,
                        task.state.to_string(),
                        task.timeout,
                        pid
                    );
                }
            }
        }
        Some("exit") => {
            println!("\rExiting, waiting for running tasks...");
            return false;
        }
        Some(cmd) => println!("\rUnknown command: {}. Please try again.", cmd),
        None => {}
    }
    true
}

fn with_id(arg: Option<&str>, f: impl FnOnce(i64)) {
    match arg.map(str::parse::<i64>) {
        Some(Ok(id)) => f(id),
        Some(Err(_)) => println!("\rInvalid task ID format."),
        None => println!("\rTask ID must be specified."),
    }
}

fn redraw(input: &str) -> io::Result<()> {
    execute!(io::stdout(),
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine))?;
    print!(">>> {}", input);
    io::stdout().flush()
}
