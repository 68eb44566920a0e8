use std::sync::Arc;

use ethers::types::Address;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, error, info, warn};

use crate::{
    error::{AppError, AppResult},
    implementations::classifier::UserError,
    layers::{
        listener::EventListener,
        session::{EventOutcome, SessionController},
    },
    types::{SelectAccountParams, SessionView, StakeAmountParams, StakeParams},
    wallet::{HostControls, WalletEvent, WalletProvider},
};

/// Line-delimited JSON-RPC 2.0 front-end over stdin/stdout.
///
/// Every session method answers with the full [`SessionView`]; a failed action
/// shows up in `view.error`, never as a JSON-RPC error.
pub struct RpcServer<W: WalletProvider> {
    host: Option<Arc<W>>,
    controller: SessionController<Arc<W>>,
}

impl<W> RpcServer<W>
where
    W: WalletProvider + HostControls,
{
    pub fn new(host: Option<Arc<W>>, controller: SessionController<Arc<W>>) -> Self {
        Self { host, controller }
    }

    pub async fn run_stdio(&self) -> AppResult<()> {
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Process requests until EOF, applying wallet events between them.
    pub async fn serve<R, O>(&self, input: R, output: O) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut writer = BufWriter::new(output);
        let mut listener = self.controller.subscribe();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = self.handle_line(&line).await;
                    write_message(&mut writer, &response).await?;
                }
                event = next_event(&mut listener) => {
                    let notification = self.apply_event(event).await;
                    write_message(&mut writer, &notification).await?;
                }
            }
        }

        Ok(())
    }

    async fn handle_line(&self, line: &str) -> RpcResponse {
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(req) => self.handle_request(req).await,
            Err(err) => {
                warn!("failed to parse JSON-RPC request: {err}");
                RpcResponse::error(Value::Null, -32700, format!("parse error: {err}"))
            }
        }
    }

    async fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let RpcRequest {
            method, params, id, ..
        } = req;
        debug!(method = %method, "handling request");

        let handled: AppResult<()> = match method.as_str() {
            "get_state" => Ok(()),
            "connect" => {
                settle("connect", self.controller.connect().await);
                Ok(())
            }
            "disconnect" => {
                self.controller.disconnect().await;
                Ok(())
            }
            "refresh" => {
                settle("refresh", self.controller.refresh().await);
                Ok(())
            }
            "set_stake_amount" => match parse_params::<StakeAmountParams>(params) {
                Ok(parsed) => {
                    self.controller.set_stake_input(parsed.amount).await;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            "stake" => match parse_optional_params::<StakeParams>(params) {
                Ok(parsed) => {
                    if let Some(amount) = parsed.amount {
                        self.controller.set_stake_input(amount).await;
                    }
                    settle("stake", self.controller.stake().await);
                    Ok(())
                }
                Err(err) => Err(err),
            },
            "unstake" => {
                settle("unstake", self.controller.unstake().await);
                Ok(())
            }
            "claim" => {
                settle("claim", self.controller.claim().await);
                Ok(())
            }
            "select_account" => match parse_params::<SelectAccountParams>(params) {
                Ok(parsed) => self.select_account(&parsed.address).await,
                Err(err) => Err(err),
            },
            "lock_wallet" => match &self.host {
                Some(host) => {
                    host.lock().await;
                    Ok(())
                }
                None => Err(AppError::Wallet("no wallet present".into())),
            },
            other => {
                warn!("received unknown method {other}");
                return RpcResponse::error(id, -32601, format!("method not found: {other}"));
            }
        };

        match handled {
            Ok(()) => self.respond_with_view(id).await,
            Err(err) => {
                error!("handler error: {err}");
                let payload = err.to_json_rpc();
                RpcResponse::error_with_data(id, payload.code, payload.message, payload.data)
            }
        }
    }

    async fn select_account(&self, raw: &str) -> AppResult<()> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| AppError::Wallet("no wallet present".into()))?;
        let address = raw
            .parse::<Address>()
            .map_err(|err| AppError::InvalidInput(format!("invalid address {raw}: {err}")))?;
        host.select_account(address).await
    }

    async fn apply_event(&self, event: WalletEvent) -> RpcNotification {
        let outcome = self.controller.handle_event(event).await;
        info!(?outcome, "wallet event applied");
        let reload = matches!(outcome, EventOutcome::Reloaded { .. });
        let state = self.controller.view().await;
        RpcNotification::new(
            "session_changed",
            json!({ "event": outcome, "reload": reload, "state": state }),
        )
    }

    async fn respond_with_view(&self, id: Value) -> RpcResponse {
        let view: SessionView = self.controller.view().await;
        match serde_json::to_value(view) {
            Ok(value) => RpcResponse::success(id, value),
            Err(err) => {
                error!("serialization error: {err}");
                RpcResponse::error(id, -32603, format!("serialization error: {err}"))
            }
        }
    }
}

/// The outcome already lives in the session's error state.
fn settle<T>(operation: &str, result: Result<T, UserError>) {
    if let Err(err) = result {
        debug!(operation, category = ?err.category, "operation ended with user error");
    }
}

/// Never resolves once the wallet is gone, so `select!` keeps serving requests.
async fn next_event(listener: &mut Option<EventListener>) -> WalletEvent {
    if let Some(active) = listener {
        if let Some(event) = active.next().await {
            return event;
        }
    }
    std::future::pending().await
}

async fn write_message<O, T>(writer: &mut BufWriter<O>, message: &T) -> AppResult<()>
where
    O: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message).map_err(AppError::from)?;
    writer.write_all(&payload).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

fn parse_params<T: DeserializeOwned>(value: Value) -> Result<T, AppError> {
    serde_json::from_value(value)
        .map_err(|err| AppError::InvalidInput(format!("invalid params: {err}")))
}

fn parse_optional_params<T: DeserializeOwned + Default>(value: Value) -> Result<T, AppError> {
    if value.is_null() {
        return Ok(T::default());
    }
    parse_params(value)
}

fn default_null() -> Value {
    Value::Null
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default = "default_null")]
    params: Value,
    #[serde(default = "default_null")]
    id: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: Value,
}

impl RpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Value, code: i32, message: String) -> Self {
        Self::error_with_data(id, code, message, json!({}))
    }

    fn error_with_data(id: Value, code: i32, message: String, data: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message,
                data,
            }),
            id,
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
    data: Value,
}

#[derive(Debug, Serialize)]
struct RpcNotification {
    jsonrpc: &'static str,
    method: &'static str,
    params: Value,
}

impl RpcNotification {
    fn new(method: &'static str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}
