// Scripted coordination server for exercising the client over real sockets.
//
// `Ensemble::start(n)` binds n loopback listeners that share one node tree
// and one session table, so a session created through one member can be
// resumed through another. Tests control the members directly: kill and
// restart listeners, drop open connections, expire sessions, deny an auth
// scheme, or write to the tree as another client would.
mod ensemble;
mod tree;

pub use ensemble::Ensemble;
