//! Printing one answer as it streams in.

use std::io::Write;
use std::sync::Arc;

use parley_core::{ChatSession, Outcome, Reply, SessionError, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Submit `text`, print the answer as it arrives, and cancel on Ctrl-C.
pub(crate) async fn respond(session: &Arc<ChatSession>, text: &str) -> Result<Reply, SessionError> {
    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        loop {
            match events.recv().await {
                Ok(SessionEvent::Delta(delta)) => {
                    print!("{}", delta);
                    stdout.flush().ok();
                }
                Ok(SessionEvent::Completed { .. })
                | Ok(SessionEvent::Cancelled)
                | Ok(SessionEvent::Failed(_)) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Output fell behind, some text was not shown");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let submit = session.submit(text);
    tokio::pin!(submit);

    let result = loop {
        tokio::select! {
            result = &mut submit => break result,
            _ = tokio::signal::ctrl_c() => {
                debug!("Ctrl-C during generation");
                // cancel() waits for submit to settle, so it runs beside it.
                let session = session.clone();
                tokio::spawn(async move {
                    session.cancel().await.ok();
                });
            }
        }
    };

    match &result {
        Ok(_) | Err(SessionError::Client(_)) => {
            printer.await.ok();
        }
        Err(_) => printer.abort(),
    }

    if let Ok(reply) = &result {
        print_footer(reply);
    }
    result
}

fn print_footer(reply: &Reply) {
    match &reply.outcome {
        Outcome::Cancelled => println!("\n[cancelled]"),
        Outcome::Completed {
            stop_reason,
            eval_count,
        } => {
            println!();
            match eval_count {
                Some(count) => println!("[{} tokens, {}]", count, stop_reason),
                None => println!("[{}]", stop_reason),
            }
        }
    }
}
