#[derive(Debug, thiserror::Error)]
pub enum AmgError {
    // --- Input validation ---
    #[error("unassembled input arrays disagree: {context}")]
    InvalidInput { context: String },

    // --- Fatal protocol failures; the collective group cannot continue ---
    #[error("assembly protocol failure: no local slot for global dof {id}")]
    AssemblyProtocol { id: u64 },

    // --- Numerical degeneracy ---
    #[error("zero diagonal on global dof {id}; Jacobi preconditioning is undefined")]
    ZeroDiagonal { id: u64 },
}

pub type AmgResult<T> = Result<T, AmgError>;
