//! In-memory backend for service tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cartwheel_core::{Email, Price, ProductId, ProductSnapshot, UserId, UserRecord};
use secrecy::{ExposeSecret, SecretString};

use super::{AuthPayload, GatewayError, RefreshPayload, Registration, RemoteCartLine, RemoteGateway};

/// Gateway operation, used to script failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    SignIn,
    SignUp,
    GetProfile,
    Refresh,
    GetCart,
    AddLine,
    RemoveLine,
    UpdateLine,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    SignIn(String),
    SignUp(String),
    GetProfile,
    Refresh(String),
    GetCart,
    AddLine(ProductId, u32),
    RemoveLine(ProductId),
    UpdateLine(ProductId, u32),
}

impl Call {
    const fn op(&self) -> Op {
        match self {
            Self::SignIn(_) => Op::SignIn,
            Self::SignUp(_) => Op::SignUp,
            Self::GetProfile => Op::GetProfile,
            Self::Refresh(_) => Op::Refresh,
            Self::GetCart => Op::GetCart,
            Self::AddLine(..) => Op::AddLine,
            Self::RemoveLine(_) => Op::RemoveLine,
            Self::UpdateLine(..) => Op::UpdateLine,
        }
    }
}

/// Scripted failure kinds.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Unauthorized,
    Server,
    Validation,
}

impl Failure {
    fn into_error(self) -> GatewayError {
        match self {
            Self::Unauthorized => GatewayError::Unauthorized("Token is invalid or expired".to_string()),
            Self::Server => GatewayError::Api {
                status: 500,
                message: "Internal Server Error".to_string(),
            },
            Self::Validation => GatewayError::Validation {
                message: "No active account found with the given credentials".to_string(),
                fields: BTreeMap::new(),
            },
        }
    }
}

#[derive(Default)]
struct FakeState {
    user: Option<UserRecord>,
    cart: Vec<RemoteCartLine>,
    calls: Vec<Call>,
    failures: HashMap<Op, VecDeque<Failure>>,
    issued: u32,
    latency: Option<Duration>,
}

/// Backend double holding a user and a cart.
#[derive(Clone, Default)]
pub(crate) struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
}

/// Product fixture with a price of `id` dollars.
pub(crate) fn product(id: i64) -> ProductSnapshot {
    ProductSnapshot::new(ProductId::new(id), format!("Product {id}"), Price::from_cents(id * 100))
}

/// User fixture.
pub(crate) fn user_record(id: i64, email: &str) -> UserRecord {
    UserRecord {
        id: UserId::new(id),
        email: Email::parse(email).unwrap_or_else(|e| panic!("bad fixture email: {e}")),
        name: None,
        first_name: Some("Jane".to_string()),
        last_name: Some("Doe".to_string()),
    }
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A backend where `jane@example.com` (id 1) exists.
    pub(crate) fn with_user() -> Self {
        let gateway = Self::new();
        gateway.lock().user = Some(user_record(1, "jane@example.com"));
        gateway
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_user(&self, user: Option<UserRecord>) {
        self.lock().user = user;
    }

    pub(crate) fn set_cart(&self, lines: &[(i64, u32)]) {
        self.lock().cart = lines
            .iter()
            .map(|&(id, quantity)| RemoteCartLine {
                product: product(id),
                quantity,
            })
            .collect();
    }

    pub(crate) fn cart_quantities(&self) -> BTreeMap<ProductId, u32> {
        self.lock()
            .cart
            .iter()
            .map(|line| (line.product.id, line.quantity))
            .collect()
    }

    /// Make the next `op` call fail.
    pub(crate) fn fail(&self, op: Op, failure: Failure) {
        self.fail_times(op, failure, 1);
    }

    pub(crate) fn fail_times(&self, op: Op, failure: Failure, times: usize) {
        self.lock()
            .failures
            .entry(op)
            .or_default()
            .extend(std::iter::repeat_n(failure, times));
    }

    /// Delay every call by `latency` (virtual time in paused tests).
    pub(crate) fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub(crate) fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|call| call.op() == op).count()
    }

    pub(crate) fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Record `call`, wait out the latency and pop any scripted failure.
    async fn enter(&self, call: Call) -> Result<(), GatewayError> {
        let op = call.op();
        let latency = {
            let mut state = self.lock();
            state.calls.push(call);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.lock().failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }

    fn issue(&self, user: UserRecord) -> AuthPayload {
        let mut state = self.lock();
        state.issued += 1;
        state.user = Some(user.clone());
        AuthPayload {
            access: format!("access-{}", state.issued),
            refresh: format!("refresh-{}", state.issued),
            user,
        }
    }
}

impl RemoteGateway for FakeGateway {
    async fn sign_in(&self, email: &Email, password: &SecretString) -> Result<AuthPayload, GatewayError> {
        self.enter(Call::SignIn(email.to_string())).await?;
        let user = self.lock().user.clone();
        match user {
            Some(user) if user.email == *email && password.expose_secret() != "wrong" => Ok(self.issue(user)),
            _ => Err(Failure::Validation.into_error()),
        }
    }

    async fn sign_up(&self, registration: &Registration) -> Result<AuthPayload, GatewayError> {
        self.enter(Call::SignUp(registration.email.to_string())).await?;
        let user = UserRecord {
            id: UserId::new(2),
            email: registration.email.clone(),
            name: None,
            first_name: Some(registration.first_name.clone()),
            last_name: Some(registration.last_name.clone()),
        };
        Ok(self.issue(user))
    }

    async fn get_profile(&self) -> Result<UserRecord, GatewayError> {
        self.enter(Call::GetProfile).await?;
        self.lock()
            .user
            .clone()
            .ok_or_else(|| Failure::Unauthorized.into_error())
    }

    async fn refresh(&self, refresh: &str) -> Result<RefreshPayload, GatewayError> {
        self.enter(Call::Refresh(refresh.to_string())).await?;
        let mut state = self.lock();
        state.issued += 1;
        Ok(RefreshPayload {
            access: format!("access-{}", state.issued),
            refresh: None,
        })
    }

    async fn get_cart(&self) -> Result<Vec<RemoteCartLine>, GatewayError> {
        self.enter(Call::GetCart).await?;
        Ok(self.lock().cart.clone())
    }

    async fn add_line(&self, id: ProductId, quantity: u32) -> Result<(), GatewayError> {
        self.enter(Call::AddLine(id, quantity)).await?;
        let mut state = self.lock();
        if let Some(line) = state.cart.iter_mut().find(|line| line.product.id == id) {
            line.quantity += quantity;
        } else {
            state.cart.push(RemoteCartLine {
                product: product(id.as_i64()),
                quantity,
            });
        }
        Ok(())
    }

    async fn remove_line(&self, id: ProductId) -> Result<(), GatewayError> {
        self.enter(Call::RemoveLine(id)).await?;
        self.lock().cart.retain(|line| line.product.id != id);
        Ok(())
    }

    async fn update_line(&self, id: ProductId, quantity: u32) -> Result<(), GatewayError> {
        self.enter(Call::UpdateLine(id, quantity)).await?;
        if let Some(line) = self.lock().cart.iter_mut().find(|line| line.product.id == id) {
            line.quantity = quantity;
        }
        Ok(())
    }
}
