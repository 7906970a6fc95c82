use std::sync::Arc;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::service::pipeline::{SwapPipeline, connected_account};
use crate::service::session::{Stage, SwapContext};
use crate::service::types::{
    ApproveTokenResponse, BuildTradeResponse, CancelSessionResponse, ListTokensResponse,
    ParseInstructionRequest, ParseInstructionResponse, QuoteSwapResponse, ResetSessionResponse,
    ResolvePoolRequest, ResolvePoolResponse, SessionStatusResponse, StageResult, TokenSummary,
    TransactionResponse,
};
use crate::service::{ServiceError, ServiceResult};
use crate::wallet::WalletConnector;

/// One swap session, exposed as MCP tools.
///
/// Every tool runs a single stage against the session's current [`SwapContext`] and
/// stores the successor context. Stages are serialized; `session_status` and
/// `cancel_session` do not wait for a running stage.
pub struct SwapService {
    tool_router: ToolRouter<Self>,
    pipeline: Arc<SwapPipeline>,
    wallet: Option<Arc<dyn WalletConnector>>,
    root: CancellationToken,
    session: Mutex<CancellationToken>,
    running: Mutex<()>,
    context: Mutex<SwapContext>,
}

// MCP Tool Layer
#[tool_router]
impl SwapService {
    pub fn new(
        pipeline: Arc<SwapPipeline>,
        wallet: Option<Arc<dyn WalletConnector>>,
        root: CancellationToken,
    ) -> Self {
        let session = root.child_token();
        Self {
            tool_router: Self::tool_router(),
            pipeline,
            wallet,
            root,
            session: Mutex::new(session),
            running: Mutex::new(()),
            context: Mutex::new(SwapContext::default()),
        }
    }

    #[instrument(skip(self))]
    #[tool(
        description = "Extract a swap from a natural-language instruction such as 'Buy 5 USDC using WETH'. Starts a new swap session."
    )]
    pub async fn parse_instruction(
        &self,
        Parameters(req): Parameters<ParseInstructionRequest>,
    ) -> Json<StageResult<ParseInstructionResponse>> {
        respond(Stage::ParseInstruction, self.parse_instruction_impl(req).await)
    }

    #[instrument(skip(self))]
    #[tool(description = "Derive the Uniswap V3 pool for the parsed token pair and read its state.")]
    pub async fn resolve_pool(
        &self,
        Parameters(req): Parameters<ResolvePoolRequest>,
    ) -> Json<StageResult<ResolvePoolResponse>> {
        respond(Stage::ResolvePool, self.resolve_pool_impl(req).await)
    }

    #[instrument(skip(self))]
    #[tool(description = "Quote the swap against the resolved pool.")]
    pub async fn quote_swap(&self) -> Json<StageResult<QuoteSwapResponse>> {
        respond(Stage::QuoteSwap, self.quote_swap_impl().await)
    }

    #[instrument(skip(self))]
    #[tool(description = "Build the trade from the route and the quoted amounts.")]
    pub async fn build_trade(&self) -> Json<StageResult<BuildTradeResponse>> {
        respond(Stage::BuildTrade, self.build_trade_impl().await)
    }

    #[instrument(skip(self))]
    #[tool(
        description = "Approve the swap router to spend the input token and wait for the approval to be mined."
    )]
    pub async fn approve_token(&self) -> Json<StageResult<ApproveTokenResponse>> {
        respond(Stage::ApproveToken, self.approve_token_impl().await)
    }

    #[instrument(skip(self))]
    #[tool(description = "Sign and broadcast the swap transaction from the connected account.")]
    pub async fn submit_swap(&self) -> Json<StageResult<TransactionResponse>> {
        respond(Stage::SubmitSwap, self.submit_swap_impl().await)
    }

    #[instrument(skip(self))]
    #[tool(description = "Wait for the swap transaction's receipt.")]
    pub async fn await_receipt(&self) -> Json<StageResult<TransactionResponse>> {
        respond(Stage::AwaitReceipt, self.await_receipt_impl().await)
    }

    #[tool(description = "Show the results of every stage run so far and the next stage to run.")]
    pub async fn session_status(&self) -> Json<SessionStatusResponse> {
        let context = self.context.lock().await;
        Json(SessionStatusResponse::from(&*context))
    }

    #[instrument(skip(self))]
    #[tool(description = "Cancel the running stage, if any. Results of finished stages are kept.")]
    pub async fn cancel_session(&self) -> Json<CancelSessionResponse> {
        let interrupted = self.running.try_lock().is_err();
        self.renew_session_token().await;
        tracing::info!("Session cancelled (stage running: {})", interrupted);
        Json(CancelSessionResponse { interrupted })
    }

    #[instrument(skip(self))]
    #[tool(description = "Cancel the running stage and discard all session results.")]
    pub async fn reset_session(&self) -> Json<ResetSessionResponse> {
        self.renew_session_token().await;
        let _running = self.running.lock().await;

        let mut context = self.context.lock().await;
        *context = SwapContext::default();
        tracing::info!("Session reset");

        Json(ResetSessionResponse {
            next_stage: context.next_stage(),
        })
    }

    #[tool(description = "List the token symbols instructions may use.")]
    pub async fn list_tokens(&self) -> Json<ListTokensResponse> {
        let registry = self.pipeline.registry();
        let tokens = registry
            .supported_tokens()
            .into_iter()
            .filter_map(|symbol| {
                registry.lookup(&symbol).map(|token| TokenSummary {
                    symbol,
                    ..TokenSummary::from(token)
                })
            })
            .collect();

        Json(ListTokensResponse { tokens })
    }
}

fn respond<T>(stage: Stage, result: ServiceResult<T>) -> Json<StageResult<T>> {
    if let Err(e) = &result {
        tracing::error!("Stage {:?} failed: {e}", stage);
    }
    Json(result.into())
}

// Business Logic - Core implementation
impl SwapService {
    async fn parse_instruction_impl(
        &self,
        req: ParseInstructionRequest,
    ) -> ServiceResult<ParseInstructionResponse> {
        let (_running, ct, _) = self.begin_stage().await;
        let result = self.pipeline.parse_instruction(&req.text, &ct).await;
        let ctx = self.settle(Stage::ParseInstruction, result).await?;

        let intent = ctx.require_intent()?;
        let instruction = ctx
            .instruction()
            .ok_or_else(|| ServiceError::InternalError("parsed context without instruction".to_string()))?;
        Ok(ParseInstructionResponse::new(instruction, intent))
    }

    async fn resolve_pool_impl(&self, req: ResolvePoolRequest) -> ServiceResult<ResolvePoolResponse> {
        let (_running, ct, snapshot) = self.begin_stage().await;
        let result = self.pipeline.resolve_pool(snapshot, req.fee_tier, &ct).await;
        let ctx = self.settle(Stage::ResolvePool, result).await?;

        Ok(ResolvePoolResponse {
            pool: ctx.require_pool()?.into(),
        })
    }

    async fn quote_swap_impl(&self) -> ServiceResult<QuoteSwapResponse> {
        let (_running, ct, snapshot) = self.begin_stage().await;
        let result = self.pipeline.quote_swap(snapshot, &ct).await;
        let ctx = self.settle(Stage::QuoteSwap, result).await?;

        let intent = ctx.require_intent()?;
        Ok(QuoteSwapResponse::new(
            ctx.require_quote()?,
            &intent.token_in,
            &intent.token_out,
        ))
    }

    async fn build_trade_impl(&self) -> ServiceResult<BuildTradeResponse> {
        let (_running, _, snapshot) = self.begin_stage().await;
        let result = self.pipeline.build_trade(snapshot);
        let ctx = self.settle(Stage::BuildTrade, result).await?;

        Ok(ctx.require_trade()?.into())
    }

    async fn approve_token_impl(&self) -> ServiceResult<ApproveTokenResponse> {
        let (_running, ct, snapshot) = self.begin_stage().await;

        let result = async {
            let wallet = self.wallet()?;
            let account = connected_account(Some(wallet), &ct).await?;

            let requested = self
                .pipeline
                .request_approval(snapshot, account, wallet, &ct)
                .await?;
            // A pending approval survives a failed or cancelled confirmation.
            self.commit(requested.clone()).await;

            self.pipeline.confirm_approval(requested, &ct).await
        }
        .await;

        let ctx = self.settle(Stage::ApproveToken, result).await?;
        Ok(ctx.require_approval()?.into())
    }

    async fn submit_swap_impl(&self) -> ServiceResult<TransactionResponse> {
        let (_running, ct, snapshot) = self.begin_stage().await;

        let result = async {
            let wallet = self.wallet()?;
            let account = connected_account(Some(wallet), &ct).await?;

            let prepared = self.pipeline.prepare_submission(snapshot, account)?;
            self.commit(prepared.clone()).await;

            self.pipeline.submit_swap(prepared, wallet, &ct).await
        }
        .await;

        let ctx = self.settle(Stage::SubmitSwap, result).await?;
        Ok(ctx.require_transaction()?.into())
    }

    async fn await_receipt_impl(&self) -> ServiceResult<TransactionResponse> {
        let (_running, ct, snapshot) = self.begin_stage().await;
        let result = self.pipeline.await_receipt(snapshot, &ct).await;
        let ctx = self.settle(Stage::AwaitReceipt, result).await?;

        Ok(ctx.require_transaction()?.into())
    }

    /// Waits for the running stage to finish, then hands out the stage lock, the
    /// session's cancellation token and a snapshot of the context.
    async fn begin_stage(&self) -> (MutexGuard<'_, ()>, CancellationToken, SwapContext) {
        let running = self.running.lock().await;
        let ct = self.session.lock().await.clone();
        let snapshot = self.context.lock().await.clone();
        (running, ct, snapshot)
    }

    async fn commit(&self, next: SwapContext) {
        *self.context.lock().await = next;
    }

    /// Stores a stage's successor context, or folds its failure into the current one.
    async fn settle(&self, stage: Stage, result: ServiceResult<SwapContext>) -> ServiceResult<SwapContext> {
        let mut context = self.context.lock().await;
        match result {
            Ok(next) => {
                *context = next.clone();
                Ok(next)
            }
            Err(e) => {
                *context = std::mem::take(&mut *context).record_failure(stage, &e);
                Err(e)
            }
        }
    }

    async fn renew_session_token(&self) {
        let mut session = self.session.lock().await;
        session.cancel();
        *session = self.root.child_token();
    }

    fn wallet(&self) -> ServiceResult<&dyn WalletConnector> {
        self.wallet.as_deref().ok_or(ServiceError::WalletNotConnected)
    }
}

impl Drop for SwapService {
    fn drop(&mut self) {
        self.session.get_mut().cancel();
    }
}

#[tool_handler]
impl ServerHandler for SwapService {}
