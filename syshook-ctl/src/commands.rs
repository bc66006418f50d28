use console::style;
use log::{debug, info};
use serde_json::Value;
use syshook::client;
use syshook::command::protocol::{
    CallbackKey, CallbacksPayload, HooksPayload, UnregisterPayload, CHANGE_STATE,
    CURRENT_CALLBACKS, HOOKS_INFO,
};
use syshook::{Endpoint, Request, Response};
use syshook_callbacks::CallbackInfo;
use syshook_core::CallbackPhase;
use syshook_engine::HookInfo;

use crate::cli::{Cli, Commands, UnregisterArgs};

type CtlResult<T> = Result<T, Box<dyn std::error::Error>>;

pub fn run(cli: &Cli) -> CtlResult<()> {
    let endpoint = cli.socket.parse::<Endpoint>()?;
    let request = build_request(&cli.command)?;
    info!("Sending {} to {}", request.command, endpoint);

    let response = client::send(&endpoint, &request)?;
    debug!("Response: {:?}", response);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return if response.is_ok() {
            Ok(())
        } else {
            Err(response.message.into())
        };
    }

    if !response.is_ok() {
        return Err(response.message.into());
    }
    println!("{}", render(&request.command, &response)?);
    Ok(())
}

pub fn build_request(command: &Commands) -> CtlResult<Request> {
    let request = match command {
        Commands::Hooks => Request::hooks_info(),
        Commands::Callbacks => Request::current_callbacks(),
        Commands::Load { file } => {
            let source = std::fs::read_to_string(file)
                .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
            Request::change_state(&source)?
        }
        Commands::Eval { source } => Request::change_state(source)?,
        Commands::Unregister(args) => Request::unregister(&unregister_payload(args))?,
    };
    Ok(request)
}

pub fn unregister_payload(args: &UnregisterArgs) -> UnregisterPayload {
    if args.all {
        return UnregisterPayload::all();
    }
    let keys = args
        .before
        .iter()
        .map(|&sysno| CallbackKey {
            sysno,
            phase: CallbackPhase::Before,
        })
        .chain(args.after.iter().map(|&sysno| CallbackKey {
            sysno,
            phase: CallbackPhase::After,
        }))
        .collect();
    UnregisterPayload::list(keys)
}

/// Human-readable rendering of a successful response
pub fn render(command: &str, response: &Response) -> CtlResult<String> {
    let text = match command {
        HOOKS_INFO => format_hooks(&response.payload_as::<HooksPayload>()?.hooks),
        CURRENT_CALLBACKS => {
            format_callbacks(&response.payload_as::<CallbacksPayload>()?.callbacks)
        }
        CHANGE_STATE => match &response.payload {
            Some(Value::String(result)) if result != "null" => {
                format!("{}\n  result: {}", response.message, result)
            }
            _ => response.message.clone(),
        },
        _ => response.message.clone(),
    };
    Ok(text)
}

pub fn format_hooks(hooks: &[HookInfo]) -> String {
    let mut out = format!("Available hooks ({}):\n", hooks.len());
    for hook in hooks {
        out.push_str(&format!(
            "\n  {:20} {}\n  {:20} args: {}  returns: {}\n",
            style(&hook.name).cyan(),
            hook.description,
            "",
            hook.args,
            hook.return_value
        ));
    }
    out
}

pub fn format_callbacks(callbacks: &[CallbackInfo]) -> String {
    if callbacks.is_empty() {
        return "No callbacks registered".to_string();
    }
    let mut out = format!("Registered callbacks ({}):\n", callbacks.len());
    for cb in callbacks {
        out.push_str(&format!(
            "\n  {:>4} {:6} {}({})\n",
            cb.sysno,
            cb.phase,
            style(&cb.entry_point).cyan(),
            cb.args.join(", ")
        ));
        for line in cb.body.lines() {
            out.push_str(&format!("         | {}\n", line));
        }
    }
    out
}
